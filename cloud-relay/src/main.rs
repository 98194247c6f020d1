use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod cli;
mod relay;

use relay_cloud as cloud;
use relay_local as local;
use relay_provision as provision;
use relay_supervisor as supervisor;
use relay_util as util;

use crate::cli::{Cli, CloudProvider};
use crate::cloud::{AzureDpsMessenger, AzureX509Messenger, Messenger, X509Config};
use crate::local::{LocalBrokerConnector, MqttConfig, MqttConnector};
use crate::provision::{
    CloudConnection, DpsConfig, DpsProvisioner, HttpProvisioner, HttpProvisioningConfig,
    Provisioner,
};
use crate::relay::{Outcome, Relay, RelayError};
use crate::supervisor::SupervisorConfig;
use crate::util::certs::{DeviceIdentity, X509Credential};
use crate::util::dirs::config_dir;
use crate::util::store::Store;
use crate::util::types::ConnectionString;

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("debug".parse().unwrap())
                    .add_directive("rumqttc=warn".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("reqwest=info".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() {
    initialize_tracing();

    let cli = cli::parse();

    // Errors end the run. The relay is started again by the device
    // supervisor, so there is no point in crashing
    match start(cli).await {
        Ok(outcome) => info!(?outcome, "run finished"),
        Err(e) => error!("{e}"),
    }
}

async fn start(cli: Cli) -> Result<Outcome, RelayError> {
    let uuid = cli
        .uuid
        .clone()
        .ok_or(RelayError::Config("BALENA_DEVICE_UUID"))?;
    let store = Store::new(cli.data_dir.clone().unwrap_or_else(config_dir));
    debug!("using data directory {}", store.root().display());

    let mut identity = DeviceIdentity::new(uuid.clone());
    if let (Some(certificate), Some(key)) = (&cli.device_certificate, &cli.device_key) {
        identity = identity.with_x509(X509Credential::from_fragments(
            certificate,
            key,
            &cli.device_key_passphrase,
        ));
    }

    let (messenger, provisioner) = match cli.provider() {
        CloudProvider::Azure => {
            let messenger = Messenger::AzureX509(AzureX509Messenger::new(X509Config {
                hub_host: cli.azure_hub_host.clone(),
                device_id: uuid,
                certificate: cli.azure_cert.clone(),
                private_key: cli.azure_private_key.clone(),
            }));

            let supervisor = match (&cli.supervisor_address, &cli.supervisor_api_key) {
                (Some(api_endpoint), Some(api_key)) => Some(SupervisorConfig {
                    api_endpoint: api_endpoint.clone(),
                    api_key: api_key.clone(),
                    timeout: cli.request_timeout,
                }),
                _ => None,
            };
            let provisioner = Provisioner::Http(HttpProvisioner::new(HttpProvisioningConfig {
                url: cli.provision_url.clone(),
                service_name: cli.service_name.clone(),
                timeout: cli.request_timeout,
                supervisor,
            }));

            (messenger, provisioner)
        }
        CloudProvider::AzureDps => {
            let connection = cloud_connection(&cli, &store).await?;
            let messenger = Messenger::AzureDps(AzureDpsMessenger::new(
                connection,
                identity.x509.clone(),
            ));

            let mut config = DpsConfig {
                id_scope: cli.dps_id_scope.clone(),
                timeout: cli.request_timeout,
                ..DpsConfig::default()
            };
            if let Some(endpoint) = &cli.dps_endpoint {
                config.endpoint = endpoint.clone();
            }
            let provisioner = Provisioner::Dps(DpsProvisioner::new(config, store));

            (messenger, provisioner)
        }
    };
    info!("using {messenger} messenger");

    let local = LocalBrokerConnector::new(MqttConnector::new(MqttConfig::new(
        cli.local_broker.clone(),
    )));

    Relay::new(messenger, provisioner, local, identity).run().await
}

/// Find the hub assignment, preferring the one given on the command line
async fn cloud_connection(
    cli: &Cli,
    store: &Store,
) -> Result<Option<ConnectionString>, RelayError> {
    let persisted = store.load::<CloudConnection>().await?;

    if let Some(connection_string) = &cli.connection_string {
        if persisted.is_some() {
            warn!("ignoring persisted hub assignment in favor of --connection-string");
        }
        return Ok(Some(connection_string.clone()));
    }

    Ok(persisted.map(|c| c.connection_string))
}
