use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use std::sync::Arc;

use crate::CloudMessenger;
use crate::error::CloudError;
use crate::hub::{HubClient, HubCredentials};
use crate::local::LocalSink;
use crate::registration::{RegistrationState, Sequencing, is_present};
use crate::util::types::Uuid;

/// Connection parameters for a device registered with an X.509 identity
///
/// The certificate and key are written into the device environment by the
/// provisioning function as base64 encoded PEM.
#[derive(Clone, Debug)]
pub struct X509Config {
    pub hub_host: Option<String>,
    pub device_id: Uuid,
    pub certificate: Option<String>,
    pub private_key: Option<String>,
}

/// Azure IoT hub messenger authenticating with credentials from the environment
pub struct AzureX509Messenger {
    config: X509Config,
    hub: HubClient,
}

impl AzureX509Messenger {
    pub fn new(config: X509Config) -> Self {
        Self {
            config,
            hub: HubClient::default(),
        }
    }

    fn credentials(&self) -> Result<HubCredentials, CloudError> {
        let host = self
            .config
            .hub_host
            .as_deref()
            .filter(|host| is_present(Some(*host)))
            .ok_or(CloudError::MissingConfig("AZURE_HUB_HOST"))?;
        let certificate = decode_pem(self.config.certificate.as_deref(), "AZURE_CERT")?;
        let private_key = decode_pem(self.config.private_key.as_deref(), "AZURE_PRIVATE_KEY")?;

        Ok(HubCredentials {
            host: host.to_string(),
            device_id: self.config.device_id.to_string(),
            certificate,
            private_key,
        })
    }
}

fn decode_pem(value: Option<&str>, name: &'static str) -> Result<String, CloudError> {
    let value = value
        .filter(|v| is_present(Some(*v)))
        .ok_or(CloudError::MissingConfig(name))?;
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|_| CloudError::Encoding(name))?;
    String::from_utf8(bytes).map_err(|_| CloudError::Encoding(name))
}

#[async_trait]
impl CloudMessenger for AzureX509Messenger {
    fn registration_state(&self) -> RegistrationState {
        RegistrationState::from_presence(&[
            is_present(self.config.certificate.as_deref()),
            is_present(self.config.private_key.as_deref()),
        ])
    }

    fn sequencing(&self) -> Sequencing {
        Sequencing::CallerSequenced
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
