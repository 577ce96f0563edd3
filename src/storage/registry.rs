//! Durable set of record ids that were already delivered.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::RecordId;

use super::local::LocalStorage;

pub(crate) const REGISTRY_KEY: &str = "sent_registry.json";

/// One delivered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentEntry {
    pub record_id: RecordId,
    pub sent_at: DateTime<Utc>,
}

/// Older registries stored bare id strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Entry(SentEntry),
    Bare(RecordId),
}

/// Idempotency registry, pruned oldest-first past `max_entries`.
#[derive(Debug)]
pub struct SentRegistry {
    storage: LocalStorage,
    entries: VecDeque<SentEntry>,
    index: HashSet<RecordId>,
    max_entries: usize,
}

impl SentRegistry {
    /// Load the registry from disk (empty if missing or unreadable).
    pub async fn open(storage: LocalStorage, max_entries: usize) -> Self {
        let stored: Vec<StoredEntry> = storage
            .read_json::<Vec<serde_json::Value>>(REGISTRY_KEY)
            .await
            .into_option()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();

        let mut registry = Self {
            storage,
            entries: VecDeque::with_capacity(stored.len()),
            index: HashSet::with_capacity(stored.len()),
            max_entries: max_entries.max(1),
        };
        for entry in stored {
            let entry = match entry {
                StoredEntry::Entry(e) => e,
                StoredEntry::Bare(record_id) => SentEntry {
                    record_id,
                    sent_at: DateTime::<Utc>::default(),
                },
            };
            if registry.index.insert(entry.record_id.clone()) {
                registry.entries.push_back(entry);
            }
        }
        let pruned = registry.prune();
        if pruned > 0 {
            log::info!("Pruned {pruned} old sent-registry entries on load");
        }
        log::debug!("Sent-registry loaded with {} entries", registry.len());
        registry
    }

    pub fn is_sent(&self, record_id: &RecordId) -> bool {
        self.index.contains(record_id)
    }

    /// Record a delivery and persist it.
    ///
    /// Returns `Ok(false)` when the id was already present. If persisting
    /// fails the id stays marked in memory, so this process will not resend it.
    pub async fn mark_sent(&mut self, record_id: RecordId, now: DateTime<Utc>) -> Result<bool> {
        if self.index.contains(&record_id) {
            return Ok(false);
        }
        self.index.insert(record_id.clone());
        self.entries.push_back(SentEntry {
            record_id,
            sent_at: now,
        });
        let pruned = self.prune();
        if pruned > 0 {
            log::info!("Pruned {pruned} oldest sent-registry entries");
        }
        self.persist().await?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self) -> usize {
        let mut pruned = 0;
        while self.entries.len() > self.max_entries {
            if let Some(oldest) = self.entries.pop_front() {
                self.index.remove(&oldest.record_id);
                pruned += 1;
            }
        }
        pruned
    }

    async fn persist(&self) -> Result<()> {
        self.storage.write_json(REGISTRY_KEY, &self.entries).await
    }
}
