//! IoT hub MQTT topic names

use url::form_urlencoded;

pub const TWIN_RESPONSE_FILTER: &str = "$iothub/twin/res/#";
pub const TWIN_PATCH_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";

const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const TWIN_PATCH_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const DEVICEBOUND_SEGMENT: &str = "/messages/devicebound/";

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Device-to-cloud topic for a message that came from the local `origin` topic
///
/// Content type and encoding are set as system properties so hub routing
/// queries can look into the JSON body.
pub fn telemetry_topic(device_id: &str, origin: &str) -> String {
    format!(
        "devices/{device_id}/messages/events/$.ct={}&$.ce=utf-8&topic={}",
        encode("application/json"),
        encode(origin)
    )
}

pub fn c2d_filter(device_id: &str) -> String {
    format!("devices/{device_id}/messages/devicebound/#")
}

pub fn twin_get_topic(request_id: &str) -> String {
    format!("$iothub/twin/GET/?$rid={request_id}")
}

/// A message arriving from the hub, classified by its topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloudTopic {
    CloudToDevice,
    TwinResponse {
        status: u16,
        request_id: Option<String>,
    },
    DesiredPatch,
}

impl CloudTopic {
    pub fn parse(topic: &str) -> Option<Self> {
        if topic.starts_with("devices/") && topic.contains(DEVICEBOUND_SEGMENT) {
            return Some(CloudTopic::CloudToDevice);
        }

        if topic.starts_with(TWIN_PATCH_PREFIX) {
            return Some(CloudTopic::DesiredPatch);
        }

        // $iothub/twin/res/{status}/?$rid={request id}
        let rest = topic.strip_prefix(TWIN_RESPONSE_PREFIX)?;
        let (status, query) = rest.split_once('/').unwrap_or((rest, ""));
        let status = status.parse().ok()?;
        let request_id = query.strip_prefix('?').and_then(|query| {
            form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "$rid")
                .map(|(_, value)| value.into_owned())
        });

        Some(CloudTopic::TwinResponse { status, request_id })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_telemetry_topic_carries_origin_and_content_type() {
        assert_eq!(
            telemetry_topic("dev-1", "sensors"),
            "devices/dev-1/messages/events/$.ct=application%2Fjson&$.ce=utf-8&topic=sensors"
        );
    }

    #[test]
    fn test_twin_topics() {
        assert_eq!(twin_get_topic("1"), "$iothub/twin/GET/?$rid=1");
        assert_eq!(c2d_filter("dev-1"), "devices/dev-1/messages/devicebound/#");
    }

    #[test]
    fn test_parse_cloud_to_device() {
        assert_eq!(
            CloudTopic::parse("devices/dev-1/messages/devicebound/%24.to=%2Fdevices%2Fdev-1"),
            Some(CloudTopic::CloudToDevice)
        );
    }

    #[test]
    fn test_parse_twin_response() {
        assert_eq!(
            CloudTopic::parse("$iothub/twin/res/200/?$rid=1"),
            Some(CloudTopic::TwinResponse {
                status: 200,
                request_id: Some("1".to_string())
            })
        );
        assert_eq!(
            CloudTopic::parse("$iothub/twin/res/204/?$rid=7&$version=3"),
            Some(CloudTopic::TwinResponse {
                status: 204,
                request_id: Some("7".to_string())
            })
        );
        assert_eq!(
            CloudTopic::parse("$iothub/twin/res/429"),
            Some(CloudTopic::TwinResponse {
                status: 429,
                request_id: None
            })
        );
    }

    #[test]
    fn test_parse_desired_patch() {
        assert_eq!(
            CloudTopic::parse("$iothub/twin/PATCH/properties/desired/?$version=4"),
            Some(CloudTopic::DesiredPatch)
        );
    }

    #[test]
    fn test_parse_unknown_topic() {
        assert_eq!(CloudTopic::parse("$iothub/methods/POST/reboot"), None);
        assert_eq!(CloudTopic::parse("$iothub/twin/res/abc/?$rid=1"), None);
    }
}
