use reqwest::Client;
use reqwest::header::CACHE_CONTROL;
use serde::Serialize;
use tracing::{Span, field, info, instrument, warn};

use crate::config::HttpProvisioningConfig;
use crate::error::ProvisioningError;
use crate::supervisor::refresh_environment;
use crate::util::certs::DeviceIdentity;
use crate::{Provision, Provisioned};

/// Error kind returned by the provisioning function when the device exists
pub const ALREADY_EXISTS_PREFIX: &str = "DeviceAlreadyExistsError";

#[derive(Serialize, Debug)]
struct RegisterRequest<'a> {
    uuid: &'a str,
    balena_service: Option<&'a str>,
}

pub struct HttpProvisioner {
    config: HttpProvisioningConfig,
}

impl HttpProvisioner {
    pub fn new(config: HttpProvisioningConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(uuid = %identity.registration_id, result = field::Empty))]
    async fn register(&self, identity: &DeviceIdentity) -> Result<Provisioned, ProvisioningError> {
        let url = self
            .config
            .url
            .as_ref()
            .ok_or(ProvisioningError::Config("PROVISION_URL"))?;

        info!("provisioning with cloud provider");
        let request = RegisterRequest {
            uuid: identity.registration_id.as_str(),
            balena_service: self.config.service_name.as_deref(),
        };
        let response = Client::new()
            .post(url.to_string())
            .header(CACHE_CONTROL, "no-cache")
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        Span::current().record("result", field::display(status));

        if status.is_success() {
            info!("provisioned OK: {status} {text}");
            return Ok(Provisioned {
                assigned_hub: None,
                device_id: identity.registration_id.to_string(),
            });
        }

        warn!("provisioning failure: {status} {text}");

        // The device may have been registered by a previous run while the
        // supervisor has not yet delivered the new variables. Ask it to
        // refresh so the next run finds the device registered.
        if text.starts_with(ALREADY_EXISTS_PREFIX) {
            warn!("device already exists; updating environment vars");
            self.refresh().await;
            return Err(ProvisioningError::AlreadyRegistered(text));
        }

        Err(ProvisioningError::Status(status, text))
    }

    async fn refresh(&self) {
        let Some(supervisor) = &self.config.supervisor else {
            warn!("no supervisor configured, cannot refresh environment");
            return;
        };

        // failures are logged by the supervisor client
        let _ = refresh_environment(supervisor).await;
    }
}

#[async_trait::async_trait]
impl Provision for HttpProvisioner {
    async fn provision(&self, identity: &DeviceIdentity) -> Result<Provisioned, ProvisioningError> {
        self.register(identity).await
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    use super::*;
    use crate::supervisor::SupervisorConfig;
    use crate::util::http::Uri;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("device-uuid".into())
    }

    fn config_for(server: &Server) -> HttpProvisioningConfig {
        let base: Uri = server.url().parse().unwrap();
        HttpProvisioningConfig {
            url: Some(base.join("/provision", None).unwrap()),
            service_name: Some("cloud-relay".to_string()),
            timeout: Duration::from_secs(5),
            supervisor: Some(SupervisorConfig {
                api_endpoint: base,
                api_key: "supervisor-key".into(),
                timeout: Duration::from_secs(5),
            }),
        }
    }

    #[tokio::test]
    async fn test_provision_success() {
        let mut server = Server::new_async().await;
        let register = server
            .mock("POST", "/provision")
            .match_header("content-type", "application/json")
            .match_header("cache-control", "no-cache")
            .match_body(Matcher::Json(json!({
                "uuid": "device-uuid",
                "balena_service": "cloud-relay"
            })))
            .with_status(201)
            .with_body("created")
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/v1/update")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let provisioner = HttpProvisioner::new(config_for(&server));
        let provisioned = provisioner.provision(&identity()).await.unwrap();

        assert_eq!(
            provisioned,
            Provisioned {
                assigned_hub: None,
                device_id: "device-uuid".to_string()
            }
        );
        register.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_already_exists_refreshes_environment_once() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/provision")
            .with_status(400)
            .with_body("DeviceAlreadyExistsError: device-uuid")
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/v1/update")
            .match_query(Matcher::UrlEncoded(
                "apikey".into(),
                "supervisor-key".into(),
            ))
            .match_body(Matcher::Json(json!({ "force": true })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let provisioner = HttpProvisioner::new(config_for(&server));
        let res = provisioner.provision(&identity()).await;

        assert!(matches!(res, Err(ProvisioningError::AlreadyRegistered(_))));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_other_failures_do_not_refresh() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/provision")
            .with_status(500)
            .with_body("InternalError")
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/v1/update")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let provisioner = HttpProvisioner::new(config_for(&server));
        let res = provisioner.provision(&identity()).await;

        match res {
            Err(ProvisioningError::Status(status, body)) => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "InternalError");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_url_is_a_config_error() {
        let provisioner = HttpProvisioner::new(HttpProvisioningConfig {
            url: None,
            service_name: None,
            timeout: Duration::from_secs(5),
            supervisor: None,
        });

        let err = provisioner.provision(&identity()).await.unwrap_err();
        assert!(err.is_config());
    }
}
