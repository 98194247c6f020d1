use std::time::Duration;

use crate::util::http::Uri;
use crate::util::types::ApiKey;

/// Supervisor API configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub api_endpoint: Uri,
    pub api_key: ApiKey,
    pub timeout: Duration,
}
