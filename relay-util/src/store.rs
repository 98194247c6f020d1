use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::trace;

use crate::config::StoredConfig;
use crate::fs::safe_write_all;

/// A directory of JSON config documents, one file per [`StoredConfig`] kind
///
/// Writes are atomic but there is no locking. Only one process should own
/// a store directory.
#[derive(Clone, Debug)]
pub struct Store {
    root: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid document name {0:?}")]
    InvalidName(&'static str),
}

impl Store {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, name: &'static str) -> Result<PathBuf, StoreError> {
        // names map to a single file directly under the root
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => {
                Ok(self.root.join(name).with_extension("json"))
            }
            _ => Err(StoreError::InvalidName(name)),
        }
    }

    /// Load the config document `C`, if one was saved before
    pub async fn load<C: StoredConfig>(&self) -> Result<Option<C>, StoreError> {
        let path = self.document_path(C::default_name())?;
        trace!("loading {} config from {}", C::kind(), path.display());

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Persist the config document `C`, replacing any previous version
    pub async fn save<C: StoredConfig>(&self, config: &C) -> Result<(), StoreError> {
        let path = self.document_path(C::default_name())?;
        trace!("storing {} config to {}", C::kind(), path.display());

        fs::create_dir_all(&self.root).await?;
        let buf = serde_json::to_vec(config)?;
        tokio::task::spawn_blocking(move || safe_write_all(path, buf))
            .await
            .map_err(io::Error::other)??;

        Ok(())
    }
}
