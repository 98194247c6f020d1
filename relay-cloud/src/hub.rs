use bytes::Bytes;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    TlsConfiguration, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::CloudError;
use crate::local::LocalSink;
use crate::router::{Route, Router};
use crate::tls;
use crate::topics::{
    TWIN_PATCH_FILTER, TWIN_RESPONSE_FILTER, c2d_filter, telemetry_topic, twin_get_topic,
};

const HUB_PORT: u16 = 8883;
const API_VERSION: &str = "2021-04-12";
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const TWIN_RETRY_DELAY: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 100;
// IoT hub messages and twin documents are capped at 256KB
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Everything needed to open an MQTT connection to an IoT hub
pub(crate) struct HubCredentials {
    pub host: String,
    pub device_id: String,
    /// PEM encoded certificate chain
    pub certificate: String,
    /// PEM encoded unencrypted private key
    pub private_key: String,
}

fn mqtt_options(credentials: &HubCredentials) -> Result<MqttOptions, CloudError> {
    let HubCredentials {
        host, device_id, ..
    } = credentials;

    let mut options = MqttOptions::new(device_id.clone(), host.clone(), HUB_PORT);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    // X.509 authenticated devices send an empty password
    options.set_credentials(format!("{host}/{device_id}/?api-version={API_VERSION}"), "");

    let tls = tls::client_config(&credentials.certificate, &credentials.private_key)?;
    options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
        Arc::new(tls),
    )));

    Ok(options)
}

/// A subscription or request sent to the hub on behalf of a route
#[derive(Debug, PartialEq)]
enum HubRequest {
    Subscribe(String, QoS),
    Publish(String),
}

impl HubRequest {
    fn c2d(device_id: &str) -> Vec<Self> {
        vec![Self::Subscribe(c2d_filter(device_id), QoS::AtLeastOnce)]
    }

    /// Subscribe to desired property updates and request the current twin
    fn twin(request_id: &str) -> Vec<Self> {
        vec![
            Self::Subscribe(TWIN_RESPONSE_FILTER.to_string(), QoS::AtMostOnce),
            Self::Subscribe(TWIN_PATCH_FILTER.to_string(), QoS::AtMostOnce),
            Self::Publish(twin_get_topic(request_id)),
        ]
    }

    async fn send(self, client: &AsyncClient) -> Result<(), ClientError> {
        match self {
            Self::Subscribe(filter, qos) => client.subscribe(filter, qos).await,
            Self::Publish(topic) => {
                client
                    .publish(topic, QoS::AtMostOnce, false, Vec::new())
                    .await
            }
        }
    }

    /// Queue the request without waiting, for use from the event loop task
    fn try_send(self, client: &AsyncClient) -> Result<(), ClientError> {
        match self {
            Self::Subscribe(filter, qos) => client.try_subscribe(filter, qos),
            Self::Publish(topic) => client.try_publish(topic, QoS::AtMostOnce, false, Vec::new()),
        }
    }
}

/// The requests that bring back the subscriptions for every route on a new
/// connection. The hub does not keep them across reconnects.
fn restore_requests(device_id: &str, router: &mut Router) -> Vec<HubRequest> {
    let mut requests = Vec::new();
    if router.has_c2d() {
        requests.extend(HubRequest::c2d(device_id));
    }
    if let Some(request_id) = router.renew_twin_request() {
        requests.extend(HubRequest::twin(&request_id));
    }
    requests
}

/// An MQTT session with the hub
///
/// Inbound messages are dispatched by a background task which owns the
/// event loop. The task is stopped when the session is dropped.
pub(crate) struct HubSession {
    client: AsyncClient,
    device_id: String,
    router: Arc<Mutex<Router>>,
    driver: JoinHandle<()>,
}

impl HubSession {
    /// Open the session. If `wait` is set, return only after the hub has
    /// accepted the connection, otherwise connect in the background.
    pub async fn open(credentials: HubCredentials, wait: bool) -> Result<Self, CloudError> {
        let options = mqtt_options(&credentials)?;
        let (client, mut eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);

        if wait {
            tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
                .await
                .map_err(|_| CloudError::Timeout)??;
            info!("connected to IoT hub {}", credentials.host);
        }

        let router = Arc::new(Mutex::new(Router::default()));
        let driver = tokio::spawn(drive(
            eventloop,
            Driver {
                client: client.clone(),
                device_id: credentials.device_id.clone(),
                router: router.clone(),
                connected: wait,
            },
        ));

        Ok(Self {
            client,
            device_id: credentials.device_id,
            router,
            driver,
        })
    }

    /// Queue a message for the hub without waiting for it to be sent.
    pub fn publish(&self, origin: &str, payload: Bytes) {
        let topic = telemetry_topic(&self.device_id, origin);
        if let Err(e) = self
            .client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
        {
            warn!("cannot send message from {origin}: {e}");
        }
    }

    pub async fn subscribe_c2d(&self, sink: Arc<dyn LocalSink>) -> Result<(), CloudError> {
        self.router.lock().await.add(Route::CloudToDevice(sink));
        for request in HubRequest::c2d(&self.device_id) {
            request.send(&self.client).await?;
        }
        debug!("subscribed to cloud-to-device messages");
        Ok(())
    }

    /// Subscribe to desired property updates and request the current twin.
    pub async fn subscribe_twin(&self, sink: Arc<dyn LocalSink>) -> Result<(), CloudError> {
        let request_id = self
            .router
            .lock()
            .await
            .add(Route::Twin(sink))
            .unwrap_or_default();
        for request in HubRequest::twin(&request_id) {
            request.send(&self.client).await?;
        }
        debug!("requested device twin");
        Ok(())
    }
}

impl Drop for HubSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), CloudError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// State of the event loop task
struct Driver {
    client: AsyncClient,
    device_id: String,
    router: Arc<Mutex<Router>>,
    // whether a connection was accepted before
    connected: bool,
}

impl Driver {
    fn send_all(&self, requests: Vec<HubRequest>) {
        for request in requests {
            if let Err(e) = request.try_send(&self.client) {
                warn!("cannot send request to hub: {e}");
            }
        }
    }

    /// Send the twin GET again after a delay, without holding up the event
    /// loop
    fn retry_twin_request(&self, request_id: String) {
        let client = self.client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TWIN_RETRY_DELAY).await;
            let request = HubRequest::Publish(twin_get_topic(&request_id));
            if let Err(e) = request.try_send(&client) {
                warn!("cannot request device twin: {e}");
            }
        });
    }
}

async fn drive(mut eventloop: EventLoop, mut driver: Driver) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, "received message from hub");
                let retry = driver
                    .router
                    .lock()
                    .await
                    .dispatch(&publish.topic, publish.payload)
                    .await;
                if let Some(request_id) = retry {
                    driver.retry_twin_request(request_id);
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to IoT hub");
                if driver.connected {
                    let requests =
                        restore_requests(&driver.device_id, &mut *driver.router.lock().await);
                    debug!("restoring {} hub subscriptions", requests.len());
                    driver.send_all(requests);
                }
                driver.connected = true;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => {
                debug!("hub session closed");
                break;
            }
            Err(e) => {
                warn!("IoT hub connection error: {e}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// A hub session that may not have been opened yet
#[derive(Default)]
pub(crate) struct HubClient {
    session: Option<HubSession>,
}

impl HubClient {
    pub async fn open(&mut self, credentials: HubCredentials, wait: bool) -> Result<(), CloudError> {
        info!(
            "connecting to IoT hub {} as {}",
            credentials.host, credentials.device_id
        );
        self.session = Some(HubSession::open(credentials, wait).await?);
        Ok(())
    }

    pub fn publish(&self, origin: &str, payload: Bytes) {
        match &self.session {
            Some(session) => session.publish(origin, payload),
            None => warn!("not connected, dropping message from {origin}"),
        }
    }

    pub async fn subscribe_c2d(&self, sink: Arc<dyn LocalSink>) -> Result<(), CloudError> {
        self.session()?.subscribe_c2d(sink).await
    }

    pub async fn subscribe_twin(&self, sink: Arc<dyn LocalSink>) -> Result<(), CloudError> {
        self.session()?.subscribe_twin(sink).await
    }

    fn session(&self) -> Result<&HubSession, CloudError> {
        self.session.as_ref().ok_or(CloudError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::local::LocalError;

    struct NullSink;

    #[async_trait::async_trait]
    impl LocalSink for NullSink {
        async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<(), LocalError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_subscribe_before_open_fails() {
        let client = HubClient::default();
        let err = client.subscribe_c2d(Arc::new(NullSink)).await.unwrap_err();
        assert!(matches!(err, CloudError::NotConnected));
    }

    #[test]
    fn test_reconnect_restores_every_route() {
        let mut router = Router::default();
        router.add(Route::CloudToDevice(Arc::new(NullSink)));
        router.add(Route::Twin(Arc::new(NullSink)));

        assert_eq!(
            restore_requests("dev-1", &mut router),
            vec![
                HubRequest::Subscribe(
                    "devices/dev-1/messages/devicebound/#".to_string(),
                    QoS::AtLeastOnce
                ),
                HubRequest::Subscribe("$iothub/twin/res/#".to_string(), QoS::AtMostOnce),
                HubRequest::Subscribe(
                    "$iothub/twin/PATCH/properties/desired/#".to_string(),
                    QoS::AtMostOnce
                ),
                // a fresh request id for the new twin snapshot
                HubRequest::Publish("$iothub/twin/GET/?$rid=2".to_string()),
            ]
        );
    }

    #[test]
    fn test_reconnect_without_routes_sends_nothing() {
        let mut router = Router::default();
        assert_eq!(restore_requests("dev-1", &mut router), vec![]);
    }
}
