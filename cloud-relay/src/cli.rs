use clap::{Parser, ValueEnum};
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use crate::util::certs::DEFAULT_KEY_PASSPHRASE;
use crate::util::http::Uri;
use crate::util::types::{ApiKey, ConnectionString, Uuid};

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CloudProvider {
    /// Azure IoT hub with X.509 credentials from the environment
    Azure,
    /// Azure IoT hub through the device provisioning service
    AzureDps,
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Cloud provider. Inferred from the DPS settings if not given
    #[arg(env = "CLOUD_PROVIDER", long = "cloud-provider", value_name = "provider")]
    pub cloud_provider: Option<CloudProvider>,

    /// Unique identifier for this device, used as registration id
    #[arg(env = "BALENA_DEVICE_UUID", long = "uuid", value_name = "uuid")]
    pub uuid: Option<Uuid>,

    /// Name of the service running the relay
    #[arg(env = "BALENA_SERVICE_NAME", long = "service-name", value_name = "str")]
    pub service_name: Option<String>,

    /// HTTP provisioning endpoint URI
    #[arg(env = "PROVISION_URL", long = "provision-url", value_name = "uri")]
    pub provision_url: Option<Uri>,

    /// URI of the Supervisor API
    #[arg(
        env = "BALENA_SUPERVISOR_ADDRESS",
        long = "supervisor-address",
        value_name = "uri",
        requires = "supervisor_api_key"
    )]
    pub supervisor_address: Option<Uri>,

    /// API key for authentication with the Supervisor API
    #[arg(
        env = "BALENA_SUPERVISOR_API_KEY",
        long = "supervisor-api-key",
        value_name = "key",
        requires = "supervisor_address"
    )]
    pub supervisor_api_key: Option<ApiKey>,

    /// IoT hub host name
    #[arg(env = "AZURE_HUB_HOST", long = "azure-hub-host", value_name = "host")]
    pub azure_hub_host: Option<String>,

    /// Base64 encoded PEM certificate for the IoT hub
    #[arg(env = "AZURE_CERT", long = "azure-cert", value_name = "base64")]
    pub azure_cert: Option<String>,

    /// Base64 encoded PEM private key for the IoT hub
    #[arg(env = "AZURE_PRIVATE_KEY", long = "azure-private-key", value_name = "base64")]
    pub azure_private_key: Option<String>,

    /// IoT hub connection string, eg. "HostName=...;DeviceId=...;x509=true"
    #[arg(
        env = "AZURE_CONNECTION_STRING",
        long = "connection-string",
        value_name = "str"
    )]
    pub connection_string: Option<ConnectionString>,

    /// Device provisioning service endpoint URI
    #[arg(env = "DPS_ENDPOINT", long = "dps-endpoint", value_name = "uri")]
    pub dps_endpoint: Option<Uri>,

    /// Device provisioning service id scope
    #[arg(env = "DPS_ID_SCOPE", long = "dps-id-scope", value_name = "scope")]
    pub dps_id_scope: Option<String>,

    /// Device certificate, with line breaks replaced by spaces
    #[arg(
        env = "DEVICE_CERTIFICATE",
        long = "device-certificate",
        value_name = "str",
        requires = "device_key"
    )]
    pub device_certificate: Option<String>,

    /// Encrypted device key, with line breaks replaced by spaces
    #[arg(
        env = "DEVICE_KEY",
        long = "device-key",
        value_name = "str",
        requires = "device_certificate"
    )]
    pub device_key: Option<String>,

    /// Passphrase of the device key
    #[arg(
        env = "DEVICE_KEY_PASSPHRASE",
        long = "device-key-passphrase",
        value_name = "str",
        default_value = DEFAULT_KEY_PASSPHRASE,
        hide_default_value = true
    )]
    pub device_key_passphrase: String,

    /// Local MQTT broker address
    #[arg(
        env = "LOCAL_MQTT_ADDRESS",
        long = "local-broker",
        value_name = "uri",
        default_value = "mqtt://127.0.0.1:1883"
    )]
    pub local_broker: Uri,

    /// Directory for persisted configuration
    #[arg(env = "RELAY_DATA_DIR", long = "data-dir", value_name = "path")]
    pub data_dir: Option<PathBuf>,

    /// Provisioning and Supervisor request timeout in milliseconds
    #[arg(
        env = "RELAY_REQUEST_TIMEOUT_MS",
        long = "request-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "30000"
    )]
    pub request_timeout: Duration,
}

impl Cli {
    /// The configured provider, or the one implied by the DPS settings
    pub fn provider(&self) -> CloudProvider {
        if let Some(provider) = self.cloud_provider {
            return provider;
        }

        if self.dps_id_scope.is_some() || self.connection_string.is_some() {
            CloudProvider::AzureDps
        } else {
            CloudProvider::Azure
        }
    }
}

pub fn parse() -> Cli {
    Parser::parse()
}
