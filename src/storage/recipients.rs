//! Recipient set and per-domain preferences.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::Result;
use crate::models::{Domain, Record, Recipient};

use super::local::LocalStorage;

pub(crate) const RECIPIENTS_KEY: &str = "recipients.json";

/// Accepted on-disk shapes: the current array of recipients, or the
/// older `{ "id": "name" }` map.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecipients {
    List(Vec<Recipient>),
    Legacy(BTreeMap<String, Option<String>>),
}

/// Persistent, ordered recipient list.
#[derive(Debug)]
pub struct RecipientStore {
    storage: LocalStorage,
    recipients: Vec<Recipient>,
}

impl RecipientStore {
    pub async fn open(storage: LocalStorage) -> Self {
        let recipients = match storage
            .read_json::<serde_json::Value>(RECIPIENTS_KEY)
            .await
            .into_option()
            .map(serde_json::from_value::<StoredRecipients>)
        {
            Some(Ok(StoredRecipients::List(list))) => list,
            Some(Ok(StoredRecipients::Legacy(map))) => {
                log::info!("Converting {} legacy recipients", map.len());
                map.into_iter()
                    .map(|(id, name)| Recipient::new(id, name))
                    .collect()
            }
            Some(Err(e)) => {
                log::error!("Recipient file has an unexpected shape: {e}; starting empty");
                Vec::new()
            }
            None => Vec::new(),
        };
        log::debug!("Loaded {} recipients", recipients.len());
        Self {
            storage,
            recipients,
        }
    }

    /// All recipients in registration order.
    pub fn list(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn get(&self, id: &str) -> Option<&Recipient> {
        self.recipients.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Recipients who want `record`, in registration order.
    pub fn enabled_for(&self, record: &Record) -> Vec<Recipient> {
        self.recipients
            .iter()
            .filter(|r| r.wants_record(record))
            .cloned()
            .collect()
    }

    /// Register a recipient on first contact. Returns `true` if it is new.
    ///
    /// Known recipients only get their display name refreshed.
    pub async fn register(&mut self, id: &str, name: Option<String>) -> Result<bool> {
        if let Some(existing) = self.recipients.iter_mut().find(|r| r.id == id) {
            if name.is_some() && existing.name != name {
                existing.name = name;
                self.persist().await?;
            }
            return Ok(false);
        }
        let recipient = Recipient::new(id, name);
        log::info!("Registered recipient {}", recipient.label());
        self.recipients.push(recipient);
        self.persist().await?;
        Ok(true)
    }

    pub async fn remove(&mut self, id: &str) -> Result<Option<Recipient>> {
        let Some(pos) = self.recipients.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let removed = self.recipients.remove(pos);
        self.persist().await?;
        Ok(Some(removed))
    }

    /// Flip one domain preference. Returns the new state, or `None` for an
    /// unknown recipient.
    pub async fn toggle(&mut self, id: &str, domain: Domain) -> Result<Option<bool>> {
        let Some(recipient) = self.recipients.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        let enabled = recipient.toggle(domain);
        self.persist().await?;
        Ok(Some(enabled))
    }

    /// Flip one news-feed subscription. Returns the new state, or `None` for
    /// an unknown recipient.
    pub async fn toggle_feed(&mut self, id: &str, feed: &str) -> Result<Option<bool>> {
        let Some(recipient) = self.recipients.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        let subscribed = recipient.toggle_feed(feed);
        self.persist().await?;
        Ok(Some(subscribed))
    }

    async fn persist(&self) -> Result<()> {
        self.storage.write_json(RECIPIENTS_KEY, &self.recipients).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn register_toggle_remove_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let mut store = RecipientStore::open(storage.clone()).await;

        assert!(store.register("1", Some("alice".into())).await.unwrap());
        assert!(store.register("2", None).await.unwrap());
        assert!(!store.register("1", Some("alice b".into())).await.unwrap());

        assert_eq!(store.toggle("2", Domain::Campaigns).await.unwrap(), Some(false));
        assert_eq!(store.toggle("9", Domain::Campaigns).await.unwrap(), None);

        let ids: Vec<_> = store
            .enabled_for(&crate::testing::campaign(1, "Spring"))
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["1"]);

        let reopened = RecipientStore::open(storage).await;
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("1").unwrap().name.as_deref(), Some("alice b"));
        assert!(!reopened.get("2").unwrap().wants(Domain::Campaigns));
    }

    #[tokio::test]
    async fn feed_subscriptions_persist() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let mut store = RecipientStore::open(storage.clone()).await;
        store.register("1", None).await.unwrap();

        assert_eq!(store.toggle_feed("1", "nasdaq").await.unwrap(), Some(true));
        assert_eq!(store.toggle_feed("7", "nasdaq").await.unwrap(), None);

        let reopened = RecipientStore::open(storage).await;
        assert!(reopened.get("1").unwrap().feeds.contains("nasdaq"));
    }

    #[tokio::test]
    async fn remove_unknown_is_noop() {
        let tmp = TempDir::new().unwrap();
        let mut store = RecipientStore::open(LocalStorage::new(tmp.path())).await;
        store.register("1", None).await.unwrap();

        assert!(store.remove("2").await.unwrap().is_none());
        assert_eq!(store.remove("1").await.unwrap().unwrap().id, "1");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn loads_legacy_map() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        std::fs::write(
            storage.path(RECIPIENTS_KEY),
            br#"{"100": "bob", "200": null}"#,
        )
        .unwrap();

        let store = RecipientStore::open(storage).await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("100").unwrap().name.as_deref(), Some("bob"));
        assert!(store.get("200").unwrap().wants(Domain::Updates));
    }
}
