// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::Result;
use crate::models::SourcesConfig;
use crate::utils::retry::Verdict;

/// Fallback wait when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &SourcesConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Read a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Classify an HTTP status for the retry loop.
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> Verdict {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Verdict::RateLimited(retry_after(headers).unwrap_or(DEFAULT_RETRY_AFTER))
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Verdict::Transient
    } else {
        Verdict::Permanent
    }
}
