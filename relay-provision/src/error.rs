use reqwest::StatusCode;
use thiserror::Error;

use crate::util::certs::CertError;
use crate::util::http::InvalidUriError;
use crate::util::store::StoreError;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Missing configuration: {0}")]
    Config(&'static str),

    #[error("Invalid device credentials: {0}")]
    Credentials(#[from] CertError),

    #[error("Invalid provisioning endpoint URI: {0}")]
    InvalidRemote(#[from] InvalidUriError),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Remote returned error: ({0}) {1}")]
    Status(StatusCode, String),

    #[error("Device is already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Registration rejected: {0}")]
    Rejected(String),

    #[error("Registration still pending after {0} status checks")]
    Timeout(u32),

    #[error("Failed to write cloud connection: {0}")]
    ReadWriteConfig(#[from] StoreError),
}

impl ProvisioningError {
    /// Configuration errors cannot be fixed by trying again later
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Credentials(_) | Self::InvalidRemote(_)
        )
    }
}
