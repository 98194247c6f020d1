/*
Connection to the MQTT broker running on the device.

Producer services publish on a fixed set of topics which the relay
forwards to the cloud, and the relay publishes cloud-originated data
back on two consumer topics.
*/

mod broker;
mod connector;
mod error;
mod mqtt;
pub mod topics;

pub use broker::{LocalBroker, LocalMessage, LocalSink};
pub use connector::{Connect, LocalBrokerConnector, LocalConnector, RetryPolicy, Session};
pub use error::LocalError;
pub use mqtt::{MqttConfig, MqttConnector, MqttSession};
pub use rumqttc::QoS;

use relay_util as util;
