use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocalError {
    #[error("Invalid broker address: {0}")]
    Address(String),

    #[error("Connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("Client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Subscription to {0} rejected by the broker")]
    Rejected(String),

    #[error("Connection to the broker was lost")]
    Disconnected,

    #[error("Connection timed out")]
    Timeout,
}

impl LocalError {
    /// The session this error came from cannot be used anymore
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Client(_) | Self::Disconnected
        )
    }
}
