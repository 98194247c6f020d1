use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::CloudMessenger;
use crate::error::CloudError;
use crate::hub::{HubClient, HubCredentials};
use crate::local::LocalSink;
use crate::registration::{RegistrationState, Sequencing, is_present};
use crate::util::certs::X509Credential;
use crate::util::types::ConnectionString;

/// Azure IoT hub messenger for devices registered through DPS
///
/// The hub and device id come from the connection string persisted by the
/// provisioning step, while the device authenticates with its own X.509
/// certificate.
pub struct AzureDpsMessenger {
    connection: Option<ConnectionString>,
    credential: Option<X509Credential>,
    hub: HubClient,
}

impl AzureDpsMessenger {
    pub fn new(connection: Option<ConnectionString>, credential: Option<X509Credential>) -> Self {
        Self {
            connection,
            credential,
            hub: HubClient::default(),
        }
    }

    fn credentials(&self) -> Result<HubCredentials, CloudError> {
        let connection = self.connection.as_ref();
        let host = connection
            .and_then(|c| c.host_name())
            .ok_or(CloudError::MissingConfig("HostName in connection string"))?;
        let device_id = connection
            .and_then(|c| c.device_id())
            .ok_or(CloudError::MissingConfig("DeviceId in connection string"))?;
        let credential = self
            .credential
            .as_ref()
            .ok_or(CloudError::MissingConfig("DEVICE_CERTIFICATE and DEVICE_KEY"))?;

        Ok(HubCredentials {
            host: host.to_string(),
            device_id: device_id.to_string(),
            certificate: credential.certificate.clone(),
            private_key: credential.unlocked_key()?,
        })
    }
}

#[async_trait]
impl CloudMessenger for AzureDpsMessenger {
    fn registration_state(&self) -> RegistrationState {
        let connection = self.connection.as_ref();
        RegistrationState::from_presence(&[
            is_present(connection.and_then(|c| c.host_name())),
            is_present(connection.and_then(|c| c.device_id())),
        ])
    }

    fn sequencing(&self) -> Sequencing {
        Sequencing::SelfSequencing
    }

    async fn connect(&mut self) -> Result<(), CloudError> {
        let credentials = self.credentials()?;
        self.hub.open(credentials, false).await
    }

    async fn connect_sync(&mut self) -> Result<(), CloudError> {
        let credentials = self.credentials()?;
        self.hub.open(credentials, true).await
    }

    async fn publish(&self, topic: &str, payload: Bytes) {
        self.hub.publish(topic, payload)
    }

    async fn subscribe_inbound(&self, local: Arc<dyn LocalSink>) -> Result<(), CloudError> {
        self.hub.subscribe_c2d(local).await
    }

    async fn subscribe_config(&self, local: Arc<dyn LocalSink>) -> Result<(), CloudError> {
        self.hub.subscribe_twin(local).await
    }
}
