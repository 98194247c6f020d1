/*
Messaging with the cloud side of the relay.

A messenger knows how far the device got in registering with its cloud,
connects with the credentials that registration produced, and moves
messages both ways: telemetry from local producers up to the hub, and
cloud-to-device messages and configuration (device twin) updates back
down to the local broker.
*/

mod dps;
mod error;
mod hub;
mod registration;
mod router;
mod tls;
pub mod topics;
mod x509;

pub use dps::AzureDpsMessenger;
pub use error::CloudError;
pub use registration::{RegistrationState, Sequencing};
pub use x509::{AzureX509Messenger, X509Config};

use async_trait::async_trait;
use bytes::Bytes;
use relay_local as local;
use relay_util as util;
use std::fmt;
use std::sync::Arc;

use crate::local::LocalSink;

#[async_trait]
pub trait CloudMessenger: Send + Sync {
    fn registration_state(&self) -> RegistrationState;

    fn sequencing(&self) -> Sequencing;

    /// Start connecting without waiting for the hub to accept.
    async fn connect(&mut self) -> Result<(), CloudError>;

    /// Connect and wait until the hub accepts the connection.
    async fn connect_sync(&mut self) -> Result<(), CloudError>;

    /// Send a message from the local `topic` to the cloud. Delivery
    /// failures are logged and never reported back.
    async fn publish(&self, topic: &str, payload: Bytes);

    /// Relay cloud-to-device messages to the local broker.
    async fn subscribe_inbound(&self, local: Arc<dyn LocalSink>) -> Result<(), CloudError>;

    /// Relay the current configuration, and every later update, to the
    /// local broker.
    async fn subscribe_config(&self, local: Arc<dyn LocalSink>) -> Result<(), CloudError>;
}

/// The cloud messenger configured for this deployment
pub enum Messenger {
    AzureX509(AzureX509Messenger),
    AzureDps(AzureDpsMessenger),
}

impl fmt::Display for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Messenger::AzureX509(_) => write!(f, "Azure IoT hub (X.509)"),
            Messenger::AzureDps(_) => write!(f, "Azure IoT hub (DPS)"),
        }
    }
}

#[async_trait]
impl CloudMessenger for Messenger {
    fn registration_state(&self) -> RegistrationState {
        match self {
            Messenger::AzureX509(m) => m.registration_state(),
            Messenger::AzureDps(m) => m.registration_state(),
        }
    }

    fn sequencing(&self) -> Sequencing {
        match self {
            Messenger::AzureX509(m) => m.sequencing(),
            Messenger::AzureDps(m) => m.sequencing(),
        }
    }

    async fn connect(&mut self) -> Result<(), CloudError> {
        match self {
            Messenger::AzureX509(m) => m.connect().await,
            Messenger::AzureDps(m) => m.connect().await,
        }
    }

    async fn connect_sync(&mut self) -> Result<(), CloudError> {
        match self {
            Messenger::AzureX509(m) => m.connect_sync().await,
            Messenger::AzureDps(m) => m.connect_sync().await,
        }
    }

    async fn publish(&self, topic: &str, payload: Bytes) {
        match self {
            Messenger::AzureX509(m) => m.publish(topic, payload).await,
            Messenger::AzureDps(m) => m.publish(topic, payload).await,
        }
    }

    async fn subscribe_inbound(&self, local: Arc<dyn LocalSink>) -> Result<(), CloudError> {
        match self {
            Messenger::AzureX509(m) => m.subscribe_inbound(local).await,
            Messenger::AzureDps(m) => m.subscribe_inbound(local).await,
        }
    }

    async fn subscribe_config(&self, local: Arc<dyn LocalSink>) -> Result<(), CloudError> {
        match self {
            Messenger::AzureX509(m) => m.subscribe_config(local).await,
            Messenger::AzureDps(m) => m.subscribe_config(local).await,
        }
    }
}
