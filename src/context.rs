//! Application context: every long-lived component, built once at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Config, Domain, Recipient};
use crate::pipeline::{RefreshStatus, SchedulePolicy, Scheduler, WatchStats, Watcher};
use crate::services::{Dispatcher, Fetcher, HttpFetcher, NotificationChannel, build_channel};
use crate::storage::{FailedQueue, LocalStorage, RecipientStore};

/// Snapshot of the watcher's state for the `info` command.
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub data_dir: PathBuf,
    pub snapshot_ages: Vec<(Domain, Option<Duration>)>,
    pub stats: WatchStats,
    pub recipients: usize,
    pub failed_messages: usize,
}

/// Owns the stores, the dispatcher, the watcher and the shutdown signal.
pub struct AppContext {
    config: Arc<Config>,
    storage: LocalStorage,
    dispatcher: Arc<Dispatcher>,
    watcher: Arc<Watcher>,
    cancel: CancellationToken,
}

impl AppContext {
    /// Wire up all components over the data directory.
    pub async fn init(
        config: Config,
        data_dir: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Result<Self> {
        Self::assemble(config, data_dir, fetcher, channel, CancellationToken::new()).await
    }

    /// Build the HTTP fetcher and configured channel, then wire everything up.
    pub async fn from_config(config: Config, data_dir: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let fetcher = Arc::new(
            HttpFetcher::new(config.sources.clone(), &config.fetch_retry)?
                .with_cancel(cancel.clone()),
        );
        let channel = build_channel(&config.channel)?;
        Self::assemble(config, data_dir, fetcher, channel, cancel).await
    }

    async fn assemble(
        config: Config,
        data_dir: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
        channel: Arc<dyn NotificationChannel>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let storage = LocalStorage::new(data_dir);

        let recipients = RecipientStore::open(storage.clone()).await;
        let failed = FailedQueue::open_failed(storage.clone()).await;
        let dispatcher = Arc::new(
            Dispatcher::new(channel, config.dispatch.clone(), recipients, failed)
                .with_cancel(cancel.clone()),
        );
        let watcher = Arc::new(
            Watcher::open(&config, storage.clone(), fetcher, Arc::clone(&dispatcher)).await,
        );

        log::info!(
            "Context ready: data in {}, domains {:?}",
            storage.root().display(),
            config.domains.ordered()
        );
        Ok(Self {
            config: Arc::new(config),
            storage,
            dispatcher,
            watcher,
            cancel,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        self.storage.root()
    }

    pub fn watcher(&self) -> &Arc<Watcher> {
        &self.watcher
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.watcher),
            SchedulePolicy::new(self.config.schedule.clone()),
            self.cancel.clone(),
        )
    }

    /// Start the scheduler loop on the runtime.
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        tokio::spawn(self.scheduler().run())
    }

    /// Run one cycle now, unless one is already in progress.
    pub async fn force_refresh(&self) -> RefreshStatus {
        let status = self.watcher.refresh(Utc::now()).await;
        log::info!("{status}");
        status
    }

    pub async fn list_recipients(&self) -> Vec<Recipient> {
        self.dispatcher.recipients().await
    }

    pub async fn register_recipient(&self, id: &str, name: Option<String>) -> Result<bool> {
        self.dispatcher.register_recipient(id, name).await
    }

    pub async fn remove_recipient(&self, id: &str) -> Result<Option<Recipient>> {
        self.dispatcher.remove_recipient(id).await
    }

    pub async fn toggle_preference(&self, id: &str, domain: Domain) -> Result<Option<bool>> {
        self.dispatcher.toggle_preference(id, domain).await
    }

    /// Flip a recipient's subscription to one configured news feed.
    pub async fn toggle_feed(&self, id: &str, feed: &str) -> Result<Option<bool>> {
        if !self.config.sources.feeds.iter().any(|f| f.id == feed) {
            return Err(AppError::validation(format!("unknown feed '{feed}'")));
        }
        self.dispatcher.toggle_feed(id, feed).await
    }

    pub async fn status(&self) -> StatusInfo {
        StatusInfo {
            data_dir: self.storage.root().to_path_buf(),
            snapshot_ages: self.watcher.snapshot_ages(Utc::now()).await,
            stats: self.watcher.stats().await,
            recipients: self.dispatcher.recipients().await.len(),
            failed_messages: self.dispatcher.failed_len().await,
        }
    }

    /// Signal every loop to stop at its next sleep.
    pub fn shutdown(&self) {
        log::info!("Shutdown requested");
        self.cancel.cancel();
    }
}
