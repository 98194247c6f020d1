use thiserror::Error;

use crate::util::certs::CertError;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("{0} is not valid base64 encoded PEM")]
    Encoding(&'static str),

    #[error("Invalid device credentials: {0}")]
    Credentials(#[from] CertError),

    #[error("Cannot configure TLS: {0}")]
    Tls(String),

    #[error("Client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("Timed out waiting for the hub to accept the connection")]
    Timeout,

    #[error("Not connected to the cloud")]
    NotConnected,
}
