use reqwest::{Client, Identity, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};

use crate::config::{CloudConnection, DpsConfig};
use crate::error::ProvisioningError;
use crate::util::certs::DeviceIdentity;
use crate::util::store::Store;
use crate::util::types::ConnectionString;
use crate::{Provision, Provisioned};

const API_VERSION: &str = "api-version=2021-06-01";

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    registration_id: &'a str,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum AssignmentStatus {
    Unassigned,
    Assigning,
    Assigned,
    Failed,
    Disabled,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RegistrationState {
    assigned_hub: Option<String>,
    device_id: Option<String>,
    error_message: Option<String>,
}

/*
    response {
        operationId
        status: unassigned | assigning | assigned | failed | disabled
        registrationState? {
            registrationId
            assignedHub?
            deviceId?
            errorMessage?
            ...
        }
    }
*/
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    #[serde(default)]
    operation_id: String,
    status: AssignmentStatus,
    registration_state: Option<RegistrationState>,
}

/// Registration against the device provisioning service with the device
/// X.509 identity
pub struct DpsProvisioner {
    config: DpsConfig,
    store: Store,
    client: Option<Client>,
}

impl DpsProvisioner {
    pub fn new(config: DpsConfig, store: Store) -> Self {
        Self {
            config,
            store,
            client: None,
        }
    }

    /// Use the given client instead of one authenticated with the device
    /// certificate
    #[cfg(test)]
    fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    fn client_for(&self, identity: &DeviceIdentity) -> Result<Client, ProvisioningError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let x509 = identity
            .x509
            .as_ref()
            .ok_or(ProvisioningError::Config("DEVICE_CERTIFICATE and DEVICE_KEY"))?;
        let pem = format!("{}\n{}\n", x509.unlocked_key()?, x509.certificate);
        let client = Client::builder()
            .identity(Identity::from_pem(pem.as_bytes())?)
            .build()?;

        Ok(client)
    }

    #[instrument(skip_all, fields(registration_id = %identity.registration_id), err)]
    async fn register(&self, identity: &DeviceIdentity) -> Result<Provisioned, ProvisioningError> {
        let id_scope = self
            .config
            .id_scope
            .as_deref()
            .ok_or(ProvisioningError::Config("DPS_ID_SCOPE"))?;
        let client = self.client_for(identity)?;
        let registration_id = identity.registration_id.as_str();
        let registrations = format!("/{id_scope}/registrations/{registration_id}");

        info!("registering with provisioning service");
        let register_uri = self
            .config
            .endpoint
            .join(&format!("{registrations}/register"), Some(API_VERSION))?;
        let request = client
            .put(register_uri.to_string())
            .json(&RegisterRequest { registration_id });
        let mut operation = self.send(request).await?;

        // Registration is asynchronous on the service side; follow the
        // operation until the service settles on an assignment
        let mut polls = 0;
        loop {
            trace!(status = ?operation.status, "registration operation");
            match operation.status {
                AssignmentStatus::Assigned => break,
                AssignmentStatus::Failed | AssignmentStatus::Disabled => {
                    let reason = operation
                        .registration_state
                        .and_then(|state| state.error_message)
                        .unwrap_or_else(|| format!("{:?}", operation.status).to_lowercase());
                    return Err(ProvisioningError::Rejected(reason));
                }
                _ => {}
            }

            if polls >= self.config.max_polls {
                return Err(ProvisioningError::Timeout(polls));
            }
            polls += 1;
            tokio::time::sleep(self.config.poll_interval).await;

            let operation_uri = self.config.endpoint.join(
                &format!("{registrations}/operations/{}", operation.operation_id),
                Some(API_VERSION),
            )?;
            operation = self.send(client.get(operation_uri.to_string())).await?;
        }

        let state = operation
            .registration_state
            .ok_or_else(|| ProvisioningError::Rejected("missing registration state".into()))?;
        let (Some(assigned_hub), Some(device_id)) = (state.assigned_hub, state.device_id) else {
            return Err(ProvisioningError::Rejected(
                "assignment is missing the hub or device id".into(),
            ));
        };

        let connection = CloudConnection {
            connection_string: ConnectionString::x509(&assigned_hub, &device_id),
        };
        self.store.save(&connection).await?;
        info!("assigned to {assigned_hub} as {device_id}");

        Ok(Provisioned {
            assigned_hub: Some(assigned_hub),
            device_id,
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<OperationStatus, ProvisioningError> {
        debug!("calling provisioning service");
        let response = request.timeout(self.config.timeout).send().await?;

        if !response.status().is_success() {
            let err_code = response.status();
            let err_msg = response.text().await.unwrap_or_default();
            return Err(ProvisioningError::Status(err_code, err_msg));
        }

        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl Provision for DpsProvisioner {
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

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("device-uuid".into())
    }

    fn provisioner_for(server: &Server, store: Store) -> DpsProvisioner {
        let config = DpsConfig {
            endpoint: server.url().parse().unwrap(),
            id_scope: Some("0ne000ABCDE".to_string()),
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            max_polls: 2,
        };
        DpsProvisioner::new(config, store).with_client(Client::new())
    }

    fn api_version() -> Matcher {
        Matcher::UrlEncoded("api-version".into(), "2021-06-01".into())
    }

    #[tokio::test]
    async fn test_registration_is_followed_until_assigned() {
        let mut server = Server::new_async().await;
        let register = server
            .mock("PUT", "/0ne000ABCDE/registrations/device-uuid/register")
            .match_query(api_version())
            .match_body(Matcher::Json(json!({ "registrationId": "device-uuid" })))
            .with_status(202)
            .with_body(json!({ "operationId": "op-1", "status": "assigning" }).to_string())
            .create_async()
            .await;
        let operation = server
            .mock("GET", "/0ne000ABCDE/registrations/device-uuid/operations/op-1")
            .match_query(api_version())
            .with_status(200)
            .with_body(
                json!({
                    "operationId": "op-1",
                    "status": "assigned",
                    "registrationState": {
                        "registrationId": "device-uuid",
                        "assignedHub": "my-hub.azure-devices.net",
                        "deviceId": "device-uuid",
                        "status": "assigned"
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let provisioner = provisioner_for(&server, store.clone());

        let provisioned = provisioner.provision(&identity()).await.unwrap();

        assert_eq!(
            provisioned,
            Provisioned {
                assigned_hub: Some("my-hub.azure-devices.net".to_string()),
                device_id: "device-uuid".to_string(),
            }
        );
        register.assert_async().await;
        operation.assert_async().await;

        let connection: CloudConnection = store.load().await.unwrap().unwrap();
        assert_eq!(
            connection.connection_string.to_string(),
            "HostName=my-hub.azure-devices.net;DeviceId=device-uuid;x509=true"
        );
    }

    #[tokio::test]
    async fn test_failed_registration_is_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/0ne000ABCDE/registrations/device-uuid/register")
            .match_query(api_version())
            .with_status(200)
            .with_body(
                json!({
                    "operationId": "op-1",
                    "status": "failed",
                    "registrationState": { "errorMessage": "Custom allocation failed" }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let provisioner = provisioner_for(&server, store.clone());

        let err = provisioner.provision(&identity()).await.unwrap_err();

        assert!(matches!(err, ProvisioningError::Rejected(ref msg) if msg == "Custom allocation failed"));
        assert!(!err.is_config());
        assert_eq!(store.load::<CloudConnection>().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_registration_gives_up_after_max_polls() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/0ne000ABCDE/registrations/device-uuid/register")
            .match_query(api_version())
            .with_status(202)
            .with_body(json!({ "operationId": "op-1", "status": "assigning" }).to_string())
            .create_async()
            .await;
        let operation = server
            .mock("GET", "/0ne000ABCDE/registrations/device-uuid/operations/op-1")
            .match_query(api_version())
            .with_status(200)
            .with_body(json!({ "operationId": "op-1", "status": "assigning" }).to_string())
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner_for(&server, Store::new(dir.path()));

        let err = provisioner.provision(&identity()).await.unwrap_err();

        assert!(matches!(err, ProvisioningError::Timeout(2)));
        operation.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_registration_reports_status() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/0ne000ABCDE/registrations/device-uuid/register")
            .match_query(api_version())
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner_for(&server, Store::new(dir.path()));

        let err = provisioner.provision(&identity()).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Status(status, _) if status.as_u16() == 401));
    }

    #[tokio::test]
    async fn test_missing_scope_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = DpsProvisioner::new(DpsConfig::default(), Store::new(dir.path()));

        let err = provisioner.provision(&identity()).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_missing_certificate_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DpsConfig {
            id_scope: Some("0ne000ABCDE".to_string()),
            ..DpsConfig::default()
        };
        let provisioner = DpsProvisioner::new(config, Store::new(dir.path()));

        let err = provisioner.provision(&identity()).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Config(_)));
    }
}
