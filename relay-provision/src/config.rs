use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::supervisor::SupervisorConfig;
use crate::util::config::StoredConfig;
use crate::util::http::Uri;
use crate::util::types::ConnectionString;

pub const DEFAULT_DPS_ENDPOINT: &str = "https://global.azure-devices-provisioning.net";

#[derive(Clone, Debug)]
pub struct HttpProvisioningConfig {
    /// Provisioning function URL. Only required once provisioning is attempted.
    pub url: Option<Uri>,

    /// Name of the service running the relay, reported to the remote
    pub service_name: Option<String>,

    pub timeout: Duration,

    /// Supervisor used to refresh the environment if the device turns
    /// out to be registered already
    pub supervisor: Option<SupervisorConfig>,
}

#[derive(Clone, Debug)]
pub struct DpsConfig {
    pub endpoint: Uri,
    pub id_scope: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for DpsConfig {
    fn default() -> Self {
        Self {
            endpoint: Uri::from_static(DEFAULT_DPS_ENDPOINT),
            id_scope: None,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(3),
            max_polls: 20,
        }
    }
}

// IMPORTANT: this struct is persisted to disk. Failing to deserialize it
// makes the device lose its assignment and register again on the next
// run. Consider how to migrate older documents before changing it.

/// Hub assignment obtained through the provisioning service
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CloudConnection {
    pub connection_string: ConnectionString,
}

impl StoredConfig for CloudConnection {
    fn kind() -> &'static str {
        "connection"
    }
}
