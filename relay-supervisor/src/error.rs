use reqwest::StatusCode;
use thiserror::Error;

use crate::util::http::InvalidUriError;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Invalid supervisor URI: {0}")]
    Uri(#[from] InvalidUriError),

    #[error("Supervisor connection failed: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("Supervisor returned error: {0}")]
    Status(StatusCode),
}
