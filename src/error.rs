// src/error.rs

//! Unified error handling for the watcher application.

use std::fmt;

use thiserror::Error;

use crate::models::Domain;
use crate::services::DeliveryError;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regular expression failed to compile
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A domain could not be fetched after retries
    #[error("Fetch failed for {domain}: {message}")]
    Fetch { domain: Domain, message: String },

    /// A notification could not be delivered
    #[error("Delivery to {recipient} failed: {source}")]
    Delivery {
        recipient: String,
        #[source]
        source: DeliveryError,
    },

    /// A spawned background task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Another poll cycle holds the watcher state
    #[error("A poll cycle is already running")]
    CycleInProgress,
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a fetch error for a domain.
    pub fn fetch(domain: Domain, message: impl fmt::Display) -> Self {
        Self::Fetch {
            domain,
            message: message.to_string(),
        }
    }

    /// Create a delivery error for a recipient.
    pub fn delivery(recipient: impl Into<String>, source: DeliveryError) -> Self {
        Self::Delivery {
            recipient: recipient.into(),
            source,
        }
    }
}
