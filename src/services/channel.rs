//! Outbound notification channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;
use thiserror::Error;

use crate::error::{AppError, Result};
use crate::models::{ChannelConfig, ChannelKind};
use crate::utils::http::retry_after;
use crate::utils::retry::Verdict;

/// Wait used when a 429 response carries no `Retry-After`.
const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(5);

/// Classified result of a failed `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The provider asked us to back off for a while
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Worth retrying later
    #[error("transient delivery error: {0}")]
    Transient(String),

    /// The recipient is gone (blocked us, deleted, unknown)
    #[error("recipient unreachable: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn verdict(&self) -> Verdict {
        match self {
            DeliveryError::RateLimited { retry_after } => Verdict::RateLimited(*retry_after),
            DeliveryError::Transient(_) => Verdict::Transient,
            DeliveryError::Permanent(_) => Verdict::Permanent,
        }
    }
}

/// Something that can deliver text to a recipient id.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
    ) -> std::result::Result<(), DeliveryError>;
}

/// Build the channel selected in the configuration.
pub fn build_channel(config: &ChannelConfig) -> Result<Arc<dyn NotificationChannel>> {
    match config.kind {
        ChannelKind::Log => Ok(Arc::new(LogChannel)),
        ChannelKind::Webhook => Ok(Arc::new(WebhookChannel::new(config)?)),
    }
}

/// Dry-run channel that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
    ) -> std::result::Result<(), DeliveryError> {
        log::info!("[dry-run] to {recipient}:\n{text}");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    text: &'a str,
}

/// POSTs `{recipient, text}` as JSON with a bearer token.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    url: url::Url,
    token: String,
}

impl WebhookChannel {
    pub fn new(config: &ChannelConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| AppError::config("webhook channel has no url"))?;
        let token = config
            .token
            .clone()
            .ok_or_else(|| AppError::config("webhook channel has no token"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url::Url::parse(url)?,
            token,
        })
    }
}

/// Map a webhook response status to a delivery result.
pub fn classify_response(
    status: StatusCode,
    headers: &HeaderMap,
) -> std::result::Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(DeliveryError::RateLimited {
            retry_after: retry_after(headers).unwrap_or(DEFAULT_RATE_LIMIT),
        }),
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE => {
            Err(DeliveryError::Permanent(format!("HTTP {status}")))
        }
        _ => Err(DeliveryError::Transient(format!("HTTP {status}"))),
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
    ) -> std::result::Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .json(&WebhookPayload { recipient, text })
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;
        classify_response(response.status(), response.headers())
    }
}
