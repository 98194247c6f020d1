/*
Client for the device supervisor running next to the relay.

The supervisor owns the device environment the relay reads its
configuration from. The only operation needed here is forcing it to
re-read the device variables from the fleet manager, which is how a
freshly provisioned device learns about its new credentials.
*/

mod config;
mod error;
mod update;

pub use config::SupervisorConfig;
pub use error::SupervisorError;
pub use update::refresh_environment;

use relay_util as util;
