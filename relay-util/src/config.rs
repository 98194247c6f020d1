use serde::Serialize;
use serde::de::DeserializeOwned;

/// A configuration document persisted in a [`Store`](crate::store::Store)
pub trait StoredConfig
where
    Self: Serialize,
    Self: DeserializeOwned,
{
    fn kind() -> &'static str;

    /// This config's preferred file name excluding the extension.
    fn default_name() -> &'static str {
        Self::kind()
    }
}
