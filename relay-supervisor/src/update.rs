use reqwest::StatusCode;
use serde_json::json;
use tracing::{Span, debug, field, info, instrument};

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;

/// Force the supervisor to fetch the device target state, refreshing the
/// environment variables of every service on the device.
///
/// This makes a single attempt. A failed refresh is recovered from by the
/// next scheduled run of the relay, so there is nothing to gain retrying here.
#[instrument(skip_all, fields(response = field::Empty), err)]
pub async fn refresh_environment(config: &SupervisorConfig) -> Result<StatusCode, SupervisorError> {
    let client = reqwest::Client::new();

    let update_url = config
        .api_endpoint
        .join("/v1/update", Some(&format!("apikey={}", config.api_key)))?;

    debug!("calling supervisor");
    let response = client
        .post(update_url.to_string())
        .timeout(config.timeout)
        .json(&json!({ "force": true }))
        .send()
        .await?;

    let status = response.status();
    Span::current().record("response", field::display(status));
    if !status.is_success() {
        return Err(SupervisorError::Status(status));
    }

    info!("supervisor updated: {status}");
    Ok(status)
}
