use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::local::LocalSink;
use crate::local::topics::{C2D_TOPIC, TWIN_TOPIC};
use crate::topics::CloudTopic;

// Failed twin GET requests are repeated this many times
const MAX_TWIN_RETRIES: u32 = 3;

/// Where inbound hub messages should be relayed to
pub(crate) enum Route {
    CloudToDevice(Arc<dyn LocalSink>),
    Twin(Arc<dyn LocalSink>),
}

struct TwinRoute {
    sink: Arc<dyn LocalSink>,
    request_id: String,
    snapshot_delivered: bool,
    retries: u32,
}

/// Dispatches messages received from the hub to the local broker
#[derive(Default)]
pub(crate) struct Router {
    c2d: Option<Arc<dyn LocalSink>>,
    twin: Option<TwinRoute>,
    last_request_id: u32,
}

impl Router {
    /// Add a route. For the twin route this returns the `$rid` the twin
    /// GET request must carry.
    pub fn add(&mut self, route: Route) -> Option<String> {
        match route {
            Route::CloudToDevice(sink) => {
                self.c2d = Some(sink);
                None
            }
            Route::Twin(sink) => {
                let request_id = self.next_request_id();
                self.twin = Some(TwinRoute {
                    sink,
                    request_id: request_id.clone(),
                    snapshot_delivered: false,
                    retries: 0,
                });
                Some(request_id)
            }
        }
    }

    pub fn has_c2d(&self) -> bool {
        self.c2d.is_some()
    }

    /// Start over with a new twin request, eg. after a reconnect where
    /// desired updates may have been missed. Returns the new `$rid`.
    pub fn renew_twin_request(&mut self) -> Option<String> {
        let request_id = self.next_request_id();
        let twin = self.twin.as_mut()?;
        twin.request_id = request_id.clone();
        twin.snapshot_delivered = false;
        twin.retries = 0;
        Some(request_id)
    }

    fn next_request_id(&mut self) -> String {
        self.last_request_id = self.last_request_id.wrapping_add(1);
        self.last_request_id.to_string()
    }

    /// Relay a hub message. If the twin request failed, the `$rid` of the
    /// request to send again is returned.
    pub async fn dispatch(&mut self, topic: &str, payload: Bytes) -> Option<String> {
        match CloudTopic::parse(topic) {
            Some(CloudTopic::CloudToDevice) => match &self.c2d {
                Some(sink) => relay(sink.as_ref(), C2D_TOPIC, payload).await,
                None => debug!("no route for cloud-to-device message"),
            },
            Some(CloudTopic::TwinResponse { status, request_id }) => {
                return self.twin_response(status, request_id, payload).await;
            }
            Some(CloudTopic::DesiredPatch) => self.desired_patch(payload).await,
            None => trace!("ignoring message on {topic}"),
        }
        None
    }

    async fn twin_response(
        &mut self,
        status: u16,
        request_id: Option<String>,
        payload: Bytes,
    ) -> Option<String> {
        let twin = self.twin.as_mut()?;

        if request_id.as_deref() != Some(twin.request_id.as_str()) {
            trace!("ignoring twin response {request_id:?}");
            return None;
        }

        if twin.snapshot_delivered {
            debug!("twin snapshot already delivered");
            return None;
        }

        if status != 200 {
            if twin.retries >= MAX_TWIN_RETRIES {
                warn!("twin request failed with status {status}, giving up");
                return None;
            }
            warn!("twin request failed with status {status}, retrying");
            let retries = twin.retries + 1;
            let request_id = self.renew_twin_request()?;
            if let Some(twin) = self.twin.as_mut() {
                twin.retries = retries;
            }
            return Some(request_id);
        }

        match desired_properties(&payload) {
            Ok(config) => {
                twin.snapshot_delivered = true;
                relay(twin.sink.as_ref(), TWIN_TOPIC, config).await;
            }
            Err(e) => warn!("invalid twin document: {e}"),
        }
        None
    }

    async fn desired_patch(&self, payload: Bytes) {
        let Some(twin) = &self.twin else {
            debug!("no route for desired properties update");
            return;
        };

        match serde_json::from_slice::<Value>(&payload) {
            Ok(patch) => match serde_json::to_vec(&patch) {
                Ok(config) => relay(twin.sink.as_ref(), TWIN_TOPIC, config.into()).await,
                Err(e) => warn!("cannot serialize desired properties update: {e}"),
            },
            Err(e) => warn!("invalid desired properties update: {e}"),
        }
    }
}

/// Extract the desired section of a full twin document
fn desired_properties(payload: &[u8]) -> Result<Bytes, serde_json::Error> {
    let mut twin: Value = serde_json::from_slice(payload)?;
    let desired = match twin.get_mut("desired") {
        Some(desired) => desired.take(),
        None => twin,
    };
    Ok(serde_json::to_vec(&desired)?.into())
}

async fn relay(sink: &dyn LocalSink, topic: &str, payload: Bytes) {
    if let Err(e) = sink.publish(topic, payload).await {
        warn!("cannot publish to local topic {topic}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    use super::*;
    use crate::local::LocalError;

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<(String, Bytes)>>,
    }

    impl RecordingSink {
        fn published(&self) -> Vec<(String, Bytes)> {
            self.published.lock().unwrap().clone()
        }

        fn published_json(&self) -> Vec<(String, Value)> {
            self.published()
                .into_iter()
                .map(|(topic, payload)| (topic, serde_json::from_slice(&payload).unwrap()))
                .collect()
        }
    }

    #[async_trait]
    impl LocalSink for RecordingSink {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), LocalError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn twin_router(sink: &Arc<RecordingSink>) -> Router {
        let mut router = Router::default();
        assert_eq!(router.add(Route::Twin(sink.clone())), Some("1".to_string()));
        router
    }

    fn twin_document() -> Bytes {
        Bytes::from(
            json!({
                "desired": {"interval": 10, "$version": 2},
                "reported": {"$version": 1}
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn test_twin_snapshot_is_relayed_once() {
        let sink = Arc::new(RecordingSink::default());
        let mut router = twin_router(&sink);

        router
            .dispatch("$iothub/twin/res/200/?$rid=1", twin_document())
            .await;
        router
            .dispatch("$iothub/twin/res/200/?$rid=1", twin_document())
            .await;

        assert_eq!(
            sink.published_json(),
            vec![(
                TWIN_TOPIC.to_string(),
                json!({"interval": 10, "$version": 2})
            )]
        );
    }

    #[tokio::test]
    async fn test_every_desired_patch_is_relayed() {
        let sink = Arc::new(RecordingSink::default());
        let mut router = twin_router(&sink);

        router
            .dispatch("$iothub/twin/res/200/?$rid=1", twin_document())
            .await;
        router
            .dispatch(
                "$iothub/twin/PATCH/properties/desired/?$version=3",
                Bytes::from(r#"{"interval": 20, "$version": 3}"#),
            )
            .await;
        router
            .dispatch(
                "$iothub/twin/PATCH/properties/desired/?$version=4",
                Bytes::from(r#"{"interval": 30, "$version": 4}"#),
            )
            .await;

        assert_eq!(
            sink.published_json(),
            vec![
                (
                    TWIN_TOPIC.to_string(),
                    json!({"interval": 10, "$version": 2})
                ),
                (
                    TWIN_TOPIC.to_string(),
                    json!({"interval": 20, "$version": 3})
                ),
                (
                    TWIN_TOPIC.to_string(),
                    json!({"interval": 30, "$version": 4})
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_unrelated_twin_responses_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let mut router = twin_router(&sink);

        router
            .dispatch("$iothub/twin/res/204/?$rid=2&$version=5", Bytes::new())
            .await;
        router
            .dispatch("$iothub/twin/res/200/?$rid=2", twin_document())
            .await;

        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn test_failed_snapshot_is_requested_again() {
        let sink = Arc::new(RecordingSink::default());
        let mut router = twin_router(&sink);

        let retry = router
            .dispatch("$iothub/twin/res/429/?$rid=1", Bytes::new())
            .await;
        assert_eq!(retry, Some("2".to_string()));
        assert!(sink.published().is_empty());

        // a late answer to the first request no longer counts
        router
            .dispatch("$iothub/twin/res/200/?$rid=1", twin_document())
            .await;
        assert!(sink.published().is_empty());

        let retry = router
            .dispatch("$iothub/twin/res/200/?$rid=2", twin_document())
            .await;
        assert_eq!(retry, None);
        assert_eq!(
            sink.published_json(),
            vec![(
                TWIN_TOPIC.to_string(),
                json!({"interval": 10, "$version": 2})
            )]
        );
    }

    #[tokio::test]
    async fn test_failed_snapshot_retries_are_bounded() {
        let sink = Arc::new(RecordingSink::default());
        let mut router = twin_router(&sink);

        let mut retries = Vec::new();
        let mut request_id = "1".to_string();
        while let Some(next) = router
            .dispatch(&format!("$iothub/twin/res/500/?$rid={request_id}"), Bytes::new())
            .await
        {
            retries.push(next.clone());
            request_id = next;
        }

        assert_eq!(retries, vec!["2", "3", "4"]);
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn test_renewed_request_delivers_snapshot_again() {
        let sink = Arc::new(RecordingSink::default());
        let mut router = twin_router(&sink);

        router
            .dispatch("$iothub/twin/res/200/?$rid=1", twin_document())
            .await;
        assert_eq!(router.renew_twin_request(), Some("2".to_string()));
        router
            .dispatch("$iothub/twin/res/200/?$rid=1", twin_document())
            .await;
        router
            .dispatch("$iothub/twin/res/200/?$rid=2", twin_document())
            .await;

        assert_eq!(sink.published().len(), 2);
    }

    #[test]
    fn test_renew_without_twin_route() {
        let mut router = Router::default();
        assert_eq!(router.renew_twin_request(), None);
        assert!(!router.has_c2d());
    }

    #[tokio::test]
    async fn test_invalid_twin_json_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut router = twin_router(&sink);

        router
            .dispatch(
                "$iothub/twin/PATCH/properties/desired/?$version=3",
                Bytes::from_static(b"{not json"),
            )
            .await;
        router
            .dispatch("$iothub/twin/res/200/?$rid=1", twin_document())
            .await;

        // the snapshot still goes through after a bad patch
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn test_cloud_to_device_payload_is_relayed_verbatim() {
        let sink = Arc::new(RecordingSink::default());
        let mut router = Router::default();
        assert_eq!(router.add(Route::CloudToDevice(sink.clone())), None);
        assert!(router.has_c2d());

        router
            .dispatch(
                "devices/dev-1/messages/devicebound/%24.to=%2Fdevices%2Fdev-1",
                Bytes::from_static(b"reboot now"),
            )
            .await;

        assert_eq!(
            sink.published(),
            vec![(C2D_TOPIC.to_string(), Bytes::from_static(b"reboot now"))]
        );
    }

    #[tokio::test]
    async fn test_messages_without_a_route_are_dropped() {
        let mut router = Router::default();

        router
            .dispatch("devices/dev-1/messages/devicebound/", Bytes::from_static(b"x"))
            .await;
        router
            .dispatch("$iothub/twin/res/200/?$rid=1", twin_document())
            .await;
        router
            .dispatch("$iothub/twin/PATCH/properties/desired/", Bytes::from_static(b"{}"))
            .await;
    }
}
