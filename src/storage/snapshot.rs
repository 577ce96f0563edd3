//! Latest full record set per domain.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Domain, Record};

use super::local::{Loaded, LocalStorage};

/// The most recent full set of records for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub domain: Domain,
    pub records: Vec<Record>,
    pub captured_at: DateTime<Utc>,
}

/// Snapshot persistence, one JSON document per domain.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    storage: LocalStorage,
}

impl SnapshotStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    pub(crate) fn key(domain: Domain) -> String {
        format!("snapshots/{domain}.json")
    }

    /// Load the live snapshot, or `None` if nothing usable is stored.
    pub async fn load(&self, domain: Domain) -> Option<Snapshot> {
        let snapshot = match self.storage.read_json::<Snapshot>(&Self::key(domain)).await {
            Loaded::Primary(s) | Loaded::Backup(s) => s,
            Loaded::Empty => return None,
        };
        if snapshot.domain != domain {
            log::error!(
                "Snapshot file for {} holds {} records; ignoring it",
                domain,
                snapshot.domain
            );
            return None;
        }
        Some(snapshot)
    }

    /// Atomically replace the snapshot for `domain`.
    ///
    /// `captured_at` never moves backwards, even if the clock does.
    pub async fn save(
        &self,
        domain: Domain,
        records: Vec<Record>,
        now: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let captured_at = match self.load(domain).await {
            Some(previous) => previous.captured_at.max(now),
            None => now,
        };
        let snapshot = Snapshot {
            domain,
            records,
            captured_at,
        };
        self.storage.write_json(&Self::key(domain), &snapshot).await?;
        log::debug!(
            "Saved {} snapshot: {} records at {}",
            domain,
            snapshot.records.len(),
            captured_at
        );
        Ok(snapshot)
    }

    /// Time since the last save; `None` when no snapshot exists (infinitely stale).
    pub async fn age(&self, domain: Domain, now: DateTime<Utc>) -> Option<Duration> {
        let snapshot = self.load(domain).await?;
        Some((now - snapshot.captured_at).to_std().unwrap_or(Duration::ZERO))
    }
}
