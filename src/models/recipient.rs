//! Notification recipients.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Domain, Record, Tracked};

/// A subscribed recipient and the domains they want to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Channel-level address (chat id, user id, ...)
    pub id: String,

    /// Optional display name
    #[serde(default)]
    pub name: Option<String>,

    /// Domains with notifications enabled
    #[serde(default = "all_domains")]
    pub preferences: BTreeSet<Domain>,

    /// News feeds subscribed to; none until opted in
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub feeds: BTreeSet<String>,

    /// When the recipient first made contact
    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
}

fn all_domains() -> BTreeSet<Domain> {
    Domain::ALL.into_iter().collect()
}

impl Recipient {
    /// Create a recipient with every domain enabled.
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            preferences: all_domains(),
            feeds: BTreeSet::new(),
            registered_at: Utc::now(),
        }
    }

    pub fn wants(&self, domain: Domain) -> bool {
        self.preferences.contains(&domain)
    }

    /// Whether this recipient should get `record`: its domain is enabled and,
    /// for news, its feed is subscribed.
    pub fn wants_record(&self, record: &Record) -> bool {
        self.wants(record.domain()) && record.feed().is_none_or(|f| self.feeds.contains(f))
    }

    /// Flip the subscription to one news feed, returning the new state.
    pub fn toggle_feed(&mut self, feed: &str) -> bool {
        if self.feeds.remove(feed) {
            false
        } else {
            self.feeds.insert(feed.to_string());
            true
        }
    }

    /// Flip the preference for a domain, returning the new state.
    pub fn toggle(&mut self, domain: Domain) -> bool {
        if self.preferences.remove(&domain) {
            false
        } else {
            self.preferences.insert(domain);
            true
        }
    }

    /// Human-readable label for logs and listings.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", self.id, name),
            None => self.id.clone(),
        }
    }
}
