/*
One-time registration of the device with the cloud identity service.

Two registration protocols are supported behind the same `Provision`
capability:

- `Http`: a POST to a fleet-specific provisioning function that creates
  the device on the cloud side and writes its credentials back into the
  device environment through the fleet manager.
- `Dps`: a registration with the device provisioning service using the
  device X.509 certificate. The assigned hub is persisted locally as a
  connection string.

In both cases success only becomes visible to the relay on its next run.
*/

mod config;
mod dps;
mod error;
mod http;

pub use config::{CloudConnection, DpsConfig, HttpProvisioningConfig};
pub use dps::DpsProvisioner;
pub use error::ProvisioningError;
pub use http::{ALREADY_EXISTS_PREFIX, HttpProvisioner};

use async_trait::async_trait;
use relay_supervisor as supervisor;
use relay_util as util;

use crate::util::certs::DeviceIdentity;

/// Connection parameters obtained by a successful registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provisioned {
    /// Hub the device was assigned to, if the protocol reports it
    pub assigned_hub: Option<String>,
    pub device_id: String,
}

#[async_trait]
pub trait Provision: Send + Sync {
    /// Register the device, making a single attempt.
    async fn provision(&self, identity: &DeviceIdentity) -> Result<Provisioned, ProvisioningError>;
}

/// The registration protocol configured for this deployment
pub enum Provisioner {
    Http(HttpProvisioner),
    Dps(DpsProvisioner),
}

#[async_trait]
impl Provision for Provisioner {
    async fn provision(&self, identity: &DeviceIdentity) -> Result<Provisioned, ProvisioningError> {
        match self {
            Provisioner::Http(provisioner) => provisioner.provision(identity).await,
            Provisioner::Dps(provisioner) => provisioner.provision(identity).await,
        }
    }
}
