//! Queued delivery work that outlives a single cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Record, RecordId, Tracked};

/// A rendered message whose immediate retries were exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub recipient: String,
    pub text: String,
    /// Replay rounds that failed so far
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
}

impl FailedMessage {
    pub fn new(recipient: impl Into<String>, text: impl Into<String>, attempts: u32) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            attempts,
            queued_at: Utc::now(),
        }
    }
}

/// A record waiting for its delayed broad delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelayedItem {
    pub record: Record,
    pub eligible_at: DateTime<Utc>,
    pub notified_privileged: bool,
}

impl PendingDelayedItem {
    pub fn record_id(&self) -> RecordId {
        self.record.record_id()
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.eligible_at <= now
    }
}
