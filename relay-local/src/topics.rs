//! Topic routing table

/// Topics published by local producers and relayed verbatim to the cloud
pub const PRODUCER_TOPICS: [&str; 3] = ["telemetry", "state", "device"];

/// Local topic receiving cloud-to-device messages
pub const C2D_TOPIC: &str = "c2d";

/// Local topic receiving device twin configuration updates
pub const TWIN_TOPIC: &str = "device-twin";

pub fn is_producer_topic(topic: &str) -> bool {
    PRODUCER_TOPICS.contains(&topic)
}
