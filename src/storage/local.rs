//! Local filesystem JSON persistence.
//!
//! Every document is written atomically (temp file, then rename) and
//! mirrored to a `.bak` sibling. Reads fall back to the backup when the
//! primary copy is missing or unreadable, and finally to "empty".
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── config.toml                  # Watcher configuration
//! ├── snapshots/
//! │   ├── updates.json(.bak)       # Latest snapshot per domain
//! │   ├── documents.json(.bak)
//! │   └── campaigns.json(.bak)
//! ├── sent_registry.json(.bak)     # Delivered record ids
//! ├── recipients.json(.bak)        # Recipients and preferences
//! ├── failed_messages.json(.bak)   # Deferred-retry queue
//! └── pending_delayed.json(.bak)   # Delayed broad deliveries
//! ```

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Outcome of reading a persisted document.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    /// Read from the primary file
    Primary(T),
    /// Primary was missing or corrupt; read from `.bak`
    Backup(T),
    /// Nothing usable on disk
    Empty,
}

impl<T> Loaded<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Loaded::Primary(value) | Loaded::Backup(value) => Some(value),
            Loaded::Empty => None,
        }
    }
}

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    pub fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Path of the backup copy for a key.
    pub fn backup_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(format!("{key}.bak"))
    }

    /// Scratch file used while replacing `path`.
    pub fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
        Self::ensure_dir(path).await?;

        let tmp = Self::temp_path(path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Write JSON data to the primary file, then refresh its backup.
    pub async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        Self::write_bytes(&self.path(key), &bytes).await?;
        Self::write_bytes(&self.backup_path(key), &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read and parse one file; `Err` carries a description of the damage.
    async fn read_file<T: DeserializeOwned>(path: &Path) -> std::result::Result<Option<T>, String> {
        match Self::read_bytes(path).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| e.to_string()),
            Ok(None) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Read JSON data, recovering from the backup copy when needed.
    pub async fn read_json<T: DeserializeOwned + Serialize>(&self, key: &str) -> Loaded<T> {
        let primary = self.path(key);
        let primary_state = match Self::read_file::<T>(&primary).await {
            Ok(Some(value)) => return Loaded::Primary(value),
            Ok(None) => "missing".to_string(),
            Err(e) => {
                log::warn!("{} is unreadable: {}", primary.display(), e);
                format!("corrupt ({e})")
            }
        };

        let backup = self.backup_path(key);
        match Self::read_file::<T>(&backup).await {
            Ok(Some(value)) => {
                log::warn!(
                    "{} is {}; recovered from {}",
                    primary.display(),
                    primary_state,
                    backup.display()
                );
                if let Err(e) = self.restore_primary(key, &value).await {
                    log::warn!("Could not restore {}: {}", primary.display(), e);
                }
                Loaded::Backup(value)
            }
            Ok(None) => {
                if primary_state != "missing" {
                    log::error!(
                        "{} is {} and has no backup; treating as empty",
                        primary.display(),
                        primary_state
                    );
                }
                Loaded::Empty
            }
            Err(e) => {
                log::error!(
                    "{} is {} and backup is unreadable ({}); treating as empty",
                    primary.display(),
                    primary_state,
                    e
                );
                Loaded::Empty
            }
        }
    }

    async fn restore_primary<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        Self::write_bytes(&self.path(key), &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_json("nested/list.json", &vec![1, 2, 3]).await.unwrap();
        let loaded: Loaded<Vec<u32>> = storage.read_json("nested/list.json").await;
        assert_eq!(loaded, Loaded::Primary(vec![1, 2, 3]));
        assert!(storage.backup_path("nested/list.json").exists());
        assert!(!LocalStorage::temp_path(&storage.path("nested/list.json")).exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let loaded: Loaded<Vec<u32>> = storage.read_json("nope.json").await;
        assert_eq!(loaded, Loaded::Empty);
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_backup_and_restores() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write_json("data.json", &vec!["a".to_string()]).await.unwrap();

        std::fs::write(storage.path("data.json"), b"{ not json").unwrap();

        let loaded: Loaded<Vec<String>> = storage.read_json("data.json").await;
        assert_eq!(loaded, Loaded::Backup(vec!["a".to_string()]));

        let again: Loaded<Vec<String>> = storage.read_json("data.json").await;
        assert_eq!(again, Loaded::Primary(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn missing_primary_uses_backup() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write_json("data.json", &vec![7u8]).await.unwrap();
        std::fs::remove_file(storage.path("data.json")).unwrap();

        let loaded: Loaded<Vec<u8>> = storage.read_json("data.json").await;
        assert_eq!(loaded, Loaded::Backup(vec![7]));
    }

    #[tokio::test]
    async fn both_copies_corrupt_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        std::fs::write(storage.path("data.json"), b"garbage").unwrap();
        std::fs::write(storage.backup_path("data.json"), b"more garbage").unwrap();

        let loaded: Loaded<Vec<u8>> = storage.read_json("data.json").await;
        assert_eq!(loaded, Loaded::Empty);
    }
}
