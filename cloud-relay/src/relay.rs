use thiserror::Error;
use tracing::{info, instrument, trace, warn};

use crate::cloud::{CloudError, CloudMessenger, RegistrationState, Sequencing};
use crate::local::topics::{PRODUCER_TOPICS, is_producer_topic};
use crate::local::{LocalConnector, LocalMessage};
use crate::provision::{Provision, ProvisioningError};
use crate::util::certs::DeviceIdentity;
use crate::util::store::StoreError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing configuration: {0}")]
    Config(&'static str),

    #[error(transparent)]
    Provisioning(ProvisioningError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("Cannot read persisted configuration: {0}")]
    Store(#[from] StoreError),
}

/// How a single run of the relay ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The device registered. The new credentials are used on the next run
    Provisioned,
    /// Registration failed and will be tried again on the next run
    ProvisioningFailed,
    /// Nothing to do until the registration completes
    PartiallyRegistered,
    /// The local broker could not be reached so the cloud was left alone
    LocalUnavailable,
    /// The relay ran until the local message stream ended
    Bridged,
}

/// Drives one pass of the registration state machine
pub struct Relay<M, P, L> {
    messenger: M,
    provisioner: P,
    local: L,
    identity: DeviceIdentity,
}

impl<M, P, L> Relay<M, P, L>
where
    M: CloudMessenger,
    P: Provision,
    L: LocalConnector,
{
    pub fn new(messenger: M, provisioner: P, local: L, identity: DeviceIdentity) -> Self {
        Self {
            messenger,
            provisioner,
            local,
            identity,
        }
    }

    #[instrument(name = "relay", skip_all, err)]
    pub async fn run(mut self) -> Result<Outcome, RelayError> {
        let state = self.messenger.registration_state();
        info!(?state, "checked registration");

        match state {
            RegistrationState::Unregistered => self.provision().await,
            RegistrationState::PartiallyRegistered => {
                warn!("device is partially registered, nothing to do until registration completes");
                Ok(Outcome::PartiallyRegistered)
            }
            RegistrationState::Registered => self.bridge().await,
        }
    }

    async fn provision(&self) -> Result<Outcome, RelayError> {
        info!("provisioning device");
        match self.provisioner.provision(&self.identity).await {
            Ok(provisioned) => {
                info!(
                    device_id = %provisioned.device_id,
                    hub = ?provisioned.assigned_hub,
                    "device provisioned, the relay will connect on the next run"
                );
                Ok(Outcome::Provisioned)
            }
            Err(e) if e.is_config() => Err(RelayError::Provisioning(e)),
            Err(e) => {
                warn!("provisioning failed: {e}");
                Ok(Outcome::ProvisioningFailed)
            }
        }
    }

    async fn bridge(&mut self) -> Result<Outcome, RelayError> {
        // Never open a cloud session nobody would drain
        let Some(broker) = self.local.connect_and_subscribe(&PRODUCER_TOPICS).await else {
            warn!("local broker unavailable, leaving the cloud connection alone");
            return Ok(Outcome::LocalUnavailable);
        };
        let (sink, mut messages) = broker.into_parts();

        match self.messenger.sequencing() {
            Sequencing::SelfSequencing => self.messenger.connect().await?,
            Sequencing::CallerSequenced => self.messenger.connect_sync().await?,
        }
        self.messenger.subscribe_inbound(sink.clone()).await?;
        self.messenger.subscribe_config(sink).await?;
        info!("relaying messages");

        while let Some(message) = messages.recv().await {
            forward(&self.messenger, message).await;
        }

        info!("local message stream ended");
        Ok(Outcome::Bridged)
    }
}

/// Forward a local message to the cloud if it came from a producer topic
async fn forward<M: CloudMessenger>(messenger: &M, message: LocalMessage) {
    if !is_producer_topic(&message.topic) {
        trace!(topic = %message.topic, "dropping message");
        return;
    }

    messenger.publish(&message.topic, message.payload).await;
}
