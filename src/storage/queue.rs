//! Small persisted work queues.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::models::{FailedMessage, PendingDelayedItem, Record, Tracked};

use super::local::LocalStorage;

pub(crate) const FAILED_MESSAGES_KEY: &str = "failed_messages.json";
pub(crate) const PENDING_DELAYED_KEY: &str = "pending_delayed.json";

/// A JSON-array-backed FIFO queue.
#[derive(Debug)]
pub struct QueueStore<T> {
    storage: LocalStorage,
    key: &'static str,
    items: Vec<T>,
}

/// Messages waiting for replay after exhausting their immediate retries.
pub type FailedQueue = QueueStore<FailedMessage>;
/// Records waiting for delayed broad delivery.
pub type PendingQueue = QueueStore<PendingDelayedItem>;

impl<T> QueueStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub async fn open(storage: LocalStorage, key: &'static str) -> Self {
        let items: Vec<T> = storage.read_json(key).await.into_option().unwrap_or_default();
        if !items.is_empty() {
            log::info!("Loaded {} queued items from {}", items.len(), key);
        }
        Self {
            storage,
            key,
            items,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub async fn push(&mut self, item: T) -> Result<()> {
        self.items.push(item);
        self.persist().await
    }

    /// Take every item out of memory. The file is left untouched until the
    /// next write, so a crash before [`Self::replace`] keeps the work.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    /// Replace the queue contents and persist.
    pub async fn replace(&mut self, items: Vec<T>) -> Result<()> {
        self.items = items;
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        self.storage.write_json(self.key, &self.items).await
    }
}

impl FailedQueue {
    pub async fn open_failed(storage: LocalStorage) -> Self {
        Self::open(storage, FAILED_MESSAGES_KEY).await
    }
}

impl PendingQueue {
    pub async fn open_pending(storage: LocalStorage) -> Self {
        Self::open(storage, PENDING_DELAYED_KEY).await
    }

    fn position(&self, record: &Record) -> Option<usize> {
        let domain = record.domain();
        let key = record.composite_key();
        self.items
            .iter()
            .position(|item| item.record.domain() == domain && item.record.composite_key() == key)
    }

    /// The pending item for the same logical record (domain and key), if any.
    pub fn find(&self, record: &Record) -> Option<&PendingDelayedItem> {
        self.position(record).map(|i| &self.items[i])
    }

    /// Queue `item`, or swap it in for the pending version of the same record.
    ///
    /// A replaced item keeps its original `eligible_at`. Returns `true` when
    /// an older version was replaced.
    pub async fn upsert(&mut self, mut item: PendingDelayedItem) -> Result<bool> {
        let replaced = match self.position(&item.record) {
            Some(i) => {
                item.eligible_at = self.items[i].eligible_at;
                self.items[i] = item;
                true
            }
            None => {
                self.items.push(item);
                false
            }
        };
        self.persist().await?;
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn queue_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let mut queue = FailedQueue::open_failed(storage.clone()).await;
        queue.push(FailedMessage::new("1", "hello", 1)).await.unwrap();
        queue.push(FailedMessage::new("2", "world", 1)).await.unwrap();

        let reopened = FailedQueue::open_failed(storage).await;
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.items()[1].text, "world");
    }

    #[tokio::test]
    async fn upsert_replaces_same_record_and_keeps_release_time() {
        use crate::testing::campaign;
        use chrono::{TimeZone, Utc};

        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let mut queue = PendingQueue::open_pending(storage.clone()).await;
        let first_due = Utc.with_ymd_and_hms(2024, 3, 4, 19, 0, 0).unwrap();

        let replaced = queue
            .upsert(PendingDelayedItem {
                record: campaign(9, "Autumn"),
                eligible_at: first_due,
                notified_privileged: true,
            })
            .await
            .unwrap();
        assert!(!replaced);

        let edited = campaign(9, "Autumn v2");
        let replaced = queue
            .upsert(PendingDelayedItem {
                record: edited.clone(),
                eligible_at: first_due + chrono::Duration::hours(2),
                notified_privileged: true,
            })
            .await
            .unwrap();
        assert!(replaced);

        queue
            .upsert(PendingDelayedItem {
                record: campaign(10, "Winter"),
                eligible_at: first_due,
                notified_privileged: true,
            })
            .await
            .unwrap();

        let reopened = PendingQueue::open_pending(storage).await;
        assert_eq!(reopened.len(), 2);
        let item = reopened.find(&campaign(9, "anything")).unwrap();
        assert_eq!(item.record, edited);
        assert_eq!(item.eligible_at, first_due);
    }

    #[tokio::test]
    async fn drain_keeps_file_until_replaced() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let mut queue = FailedQueue::open_failed(storage.clone()).await;
        queue.push(FailedMessage::new("1", "hello", 1)).await.unwrap();

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
        assert_eq!(FailedQueue::open_failed(storage.clone()).await.len(), 1);

        queue.replace(Vec::new()).await.unwrap();
        assert!(FailedQueue::open_failed(storage).await.is_empty());
    }
}
