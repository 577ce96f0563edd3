//! The poll → diff → notify cycle.
//!
//! One [`Watcher`] owns the sent-registry and the delayed-delivery queue
//! behind a single async mutex. Whoever holds it (the scheduler or a manual
//! refresh) is the only writer of snapshots, registry and pending items.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{AppError, Result};
use crate::models::{
    Config, DispatchConfig, Domain, DomainsConfig, PendingDelayedItem, Record, RecordId,
    TemplateConfig, Tracked,
};
use crate::services::{DeliveryReport, Dispatcher, Fetcher, ReplayReport};
use crate::storage::{LocalStorage, PendingQueue, SentRegistry, SnapshotStore};

use super::diff::{calculate_diff, carry_forward, dedupe_by_key};

/// State mutated only by the cycle holder.
pub struct WatchState {
    registry: SentRegistry,
    pending: PendingQueue,
}

/// Result of one domain's poll.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSummary {
    pub domain: Domain,
    pub fetched: usize,
    pub changes: usize,
    /// First capture of this domain; nothing was notified
    pub baseline: bool,
    pub notify: NotifyOutcome,
}

/// A domain whose poll failed.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainFailure {
    pub domain: Domain,
    pub message: String,
}

/// What the notify step did with a batch of changed records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Records delivered and marked sent
    pub sent: usize,
    /// Records handed to privileged recipients and queued for later
    pub delayed: usize,
    /// Records skipped as already sent, already pending or excluded
    pub skipped: usize,
    pub delivery: DeliveryReport,
}

/// Outcome of a full cycle over every enabled domain.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub succeeded: Vec<DomainSummary>,
    pub failed: Vec<DomainFailure>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.succeeded.iter().map(|s| s.changes).sum()
    }

    pub fn notified_count(&self) -> usize {
        self.succeeded
            .iter()
            .map(|s| s.notify.sent + s.notify.delayed)
            .sum()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} domains ok, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )?;
        if !self.failed.is_empty() {
            let names: Vec<&str> = self.failed.iter().map(|d| d.domain.as_str()).collect();
            write!(f, " ({})", names.join(", "))?;
        }
        write!(
            f,
            "; {} changes, {} notified",
            self.change_count(),
            self.notified_count()
        )
    }
}

/// Result of a manual refresh request.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStatus {
    Completed(CycleReport),
    AlreadyRunning,
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStatus::Completed(report) => write!(f, "Refresh complete: {report}"),
            RefreshStatus::AlreadyRunning => {
                f.write_str("A check is already running, try again shortly")
            }
        }
    }
}

/// Work done outside the poll itself on a scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeferredReport {
    /// Delayed records broadcast to everyone
    pub released: usize,
    pub replay: ReplayReport,
}

/// Counters shown by `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchStats {
    pub sent_records: usize,
    pub pending_items: usize,
}

/// Runs poll cycles against the stores.
pub struct Watcher {
    fetcher: Arc<dyn Fetcher>,
    dispatcher: Arc<Dispatcher>,
    snapshots: SnapshotStore,
    domains: DomainsConfig,
    templates: TemplateConfig,
    state: Mutex<WatchState>,
}

impl Watcher {
    /// Open the watcher's stores under `storage`.
    pub async fn open(
        config: &Config,
        storage: LocalStorage,
        fetcher: Arc<dyn Fetcher>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let registry = SentRegistry::open(storage.clone(), config.registry.max_entries).await;
        let pending = PendingQueue::open_pending(storage.clone()).await;
        Self {
            fetcher,
            dispatcher,
            snapshots: SnapshotStore::new(storage),
            domains: config.domains.clone(),
            templates: config.templates.clone(),
            state: Mutex::new(WatchState { registry, pending }),
        }
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    fn dispatch_config(&self) -> &DispatchConfig {
        self.dispatcher.config()
    }

    fn try_state(&self) -> Result<MutexGuard<'_, WatchState>> {
        self.state.try_lock().map_err(|_| AppError::CycleInProgress)
    }

    /// Snapshot age per enabled domain, `None` for never-captured domains.
    pub async fn snapshot_ages(&self, now: DateTime<Utc>) -> Vec<(Domain, Option<Duration>)> {
        let mut ages = Vec::new();
        for domain in self.domains.ordered() {
            ages.push((domain, self.snapshots.age(domain, now).await));
        }
        ages
    }

    pub async fn stats(&self) -> WatchStats {
        let state = self.state.lock().await;
        WatchStats {
            sent_records: state.registry.len(),
            pending_items: state.pending.len(),
        }
    }

    pub async fn is_sent(&self, record_id: &RecordId) -> bool {
        self.state.lock().await.registry.is_sent(record_id)
    }

    /// Poll every enabled domain in order.
    ///
    /// Fails only with [`AppError::CycleInProgress`]; per-domain failures
    /// are collected in the report.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.run_domains(now, &self.domains.ordered()).await
    }

    /// Poll only `domains`, in the given order.
    pub async fn run_domains(&self, now: DateTime<Utc>, domains: &[Domain]) -> Result<CycleReport> {
        let mut state = self.try_state()?;
        let mut report = CycleReport {
            started_at: now,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for &domain in domains {
            match self.poll_domain(&mut state, domain, now).await {
                Ok(summary) => {
                    log::info!(
                        "{}: {} fetched, {} changes, {} sent, {} delayed",
                        domain,
                        summary.fetched,
                        summary.changes,
                        summary.notify.sent,
                        summary.notify.delayed
                    );
                    report.succeeded.push(summary);
                }
                Err(error) => {
                    log::error!("{domain}: cycle failed: {error}");
                    report.failed.push(DomainFailure {
                        domain,
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Manual "check now".
    pub async fn refresh(&self, now: DateTime<Utc>) -> RefreshStatus {
        match self.run_cycle(now).await {
            Ok(report) => RefreshStatus::Completed(report),
            Err(_) => RefreshStatus::AlreadyRunning,
        }
    }

    /// Release due delayed items and replay the failed-message queue.
    pub async fn run_deferred(&self, now: DateTime<Utc>) -> Result<DeferredReport> {
        let mut state = self.try_state()?;
        let released = self.release_pending(&mut state, now).await;
        let replay = self.dispatcher.replay_failed().await;
        Ok(DeferredReport { released, replay })
    }

    /// Notify a batch of changed records for `domain`.
    pub async fn notify(
        &self,
        domain: Domain,
        records: Vec<Record>,
        now: DateTime<Utc>,
    ) -> Result<NotifyOutcome> {
        let mut state = self.try_state()?;
        Ok(self.notify_changes(&mut state, domain, records, now).await)
    }

    async fn poll_domain(
        &self,
        state: &mut WatchState,
        domain: Domain,
        now: DateTime<Utc>,
    ) -> Result<DomainSummary> {
        let fetched = self.fetcher.fetch(domain).await?;
        let fetched_count = fetched.len();
        let (records, dropped) = dedupe_by_key(fetched);
        if dropped > 0 {
            log::warn!("{domain}: dropped {dropped} records with duplicate keys");
        }

        let previous = self.snapshots.load(domain).await;
        let previous_records = previous.as_ref().map(|s| s.records.as_slice()).unwrap_or(&[]);
        let diff = calculate_diff(previous_records, &records);
        let changes = diff.change_count();

        let baseline = previous.is_none() && !self.domains.notify_on_first_snapshot;
        let notify = if baseline {
            log::info!(
                "{domain}: first snapshot of {} records taken as baseline",
                records.len()
            );
            NotifyOutcome::default()
        } else {
            self.notify_changes(state, domain, diff.into_records(), now)
                .await
        };

        let merged = carry_forward(records, previous_records);
        self.snapshots.save(domain, merged, now).await?;

        Ok(DomainSummary {
            domain,
            fetched: fetched_count,
            changes,
            baseline,
            notify,
        })
    }

    /// Fan out records to recipients, record by record.
    ///
    /// A record is marked sent only after every recipient was attempted.
    async fn notify_changes(
        &self,
        state: &mut WatchState,
        domain: Domain,
        records: Vec<Record>,
        now: DateTime<Utc>,
    ) -> NotifyOutcome {
        let mut outcome = NotifyOutcome::default();
        let delayed = self.dispatch_config().is_delayed(domain);

        for record in records {
            if record
                .campaign_type()
                .is_some_and(|t| self.domains.excluded_campaign_types.contains(&t))
            {
                log::debug!("{domain}: skipping excluded campaign type");
                outcome.skipped += 1;
                continue;
            }
            let record_id = record.record_id();
            if state.registry.is_sent(&record_id) {
                log::debug!("{domain}: {record_id} already sent");
                outcome.skipped += 1;
                continue;
            }

            let text = record.render(&self.templates);
            if delayed {
                if state
                    .pending
                    .find(&record)
                    .is_some_and(|item| item.record_id() == record_id)
                {
                    outcome.skipped += 1;
                    continue;
                }
                let privileged: Vec<_> = self
                    .dispatcher
                    .recipients_for(&record)
                    .await
                    .into_iter()
                    .filter(|r| self.dispatch_config().is_privileged(&r.id))
                    .collect();
                outcome
                    .delivery
                    .merge(self.dispatcher.broadcast(&privileged, &text).await);

                let item = PendingDelayedItem {
                    record,
                    eligible_at: self.release_time(now),
                    notified_privileged: true,
                };
                match state.pending.upsert(item).await {
                    Ok(true) => {
                        log::info!("{domain}: {record_id} replaces an edited record still pending")
                    }
                    Ok(false) => {}
                    Err(e) => log::error!("{domain}: could not persist delayed item {record_id}: {e}"),
                }
                outcome.delayed += 1;
            } else {
                let recipients = self.dispatcher.recipients_for(&record).await;
                outcome
                    .delivery
                    .merge(self.dispatcher.broadcast(&recipients, &text).await);
                Self::mark_sent(state, record_id, now).await;
                outcome.sent += 1;
            }
        }
        outcome
    }

    fn release_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.dispatch_config().delay_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Broadcast due delayed items to everyone not already notified.
    async fn release_pending(&self, state: &mut WatchState, now: DateTime<Utc>) -> usize {
        let items = state.pending.drain();
        if items.is_empty() {
            return 0;
        }

        let mut waiting = Vec::new();
        let mut released = 0;
        for item in items {
            if !item.is_eligible(now) {
                waiting.push(item);
                continue;
            }
            let record_id = item.record_id();
            if state.registry.is_sent(&record_id) {
                continue;
            }
            let domain = item.record.domain();
            let text = item.record.render(&self.templates);
            let recipients: Vec<_> = self
                .dispatcher
                .recipients_for(&item.record)
                .await
                .into_iter()
                .filter(|r| !(item.notified_privileged && self.dispatch_config().is_privileged(&r.id)))
                .collect();
            let report = self.dispatcher.broadcast(&recipients, &text).await;
            log::info!(
                "{domain}: released delayed {record_id} to {} recipients",
                report.delivered
            );
            Self::mark_sent(state, record_id, now).await;
            released += 1;
        }

        if let Err(e) = state.pending.replace(waiting).await {
            log::error!("Could not persist delayed queue: {e}");
        }
        released
    }

    async fn mark_sent(state: &mut WatchState, record_id: RecordId, now: DateTime<Utc>) {
        // A failed write here can cause one redelivery after a restart.
        if let Err(e) = state.registry.mark_sent(record_id.clone(), now).await {
            log::error!("Could not persist sent-registry entry {record_id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;
    use crate::services::DeliveryError;
    use crate::storage::{FailedQueue, RecipientStore};
    use crate::testing::{RecordingChannel, ScriptedFetcher, campaign, update};
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        fetcher: Arc<ScriptedFetcher>,
        channel: Arc<RecordingChannel>,
        watcher: Watcher,
    }

    async fn harness(config: Config, recipients: &[&str]) -> Harness {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let channel = Arc::new(RecordingChannel::default());

        let mut store = RecipientStore::open(storage.clone()).await;
        for id in recipients {
            store.register(id, None).await.unwrap();
        }
        let failed = FailedQueue::open_failed(storage.clone()).await;
        let dispatcher = Arc::new(Dispatcher::new(
            channel.clone(),
            config.dispatch.clone(),
            store,
            failed,
        ));
        let watcher = Watcher::open(&config, storage, fetcher.clone(), dispatcher).await;
        Harness {
            _tmp: tmp,
            fetcher,
            channel,
            watcher,
        }
    }

    fn config(domains: &[Domain]) -> Config {
        let mut config = Config::default();
        config.domains.enabled = domains.to_vec();
        config
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn new_record_is_notified_and_marked_sent() {
        let h = harness(config(&[Domain::Updates]), &["1", "2"]).await;
        let a = vec![update(1, "2024-01-01", "active")];
        h.watcher
            .snapshots()
            .save(Domain::Updates, a.clone(), now())
            .await
            .unwrap();

        let added = update(1, "2024-02-01", "new");
        h.fetcher
            .push(Domain::Updates, vec![a[0].clone(), added.clone()]);

        let report = h.watcher.run_cycle(now()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.change_count(), 1);

        assert!(h.watcher.is_sent(&added.record_id()).await);
        assert!(!h.watcher.is_sent(&a[0].record_id()).await);
        assert_eq!(h.channel.delivered_to("1").len(), 1);
        assert_eq!(h.channel.delivered_to("2").len(), 1);
        assert!(h.channel.delivered_to("1")[0].contains("Update of 2024-02-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn notifying_twice_sends_once() {
        let h = harness(config(&[Domain::Updates]), &["1"]).await;
        let records = vec![update(3, "2024-05-01", "active")];

        let first = h
            .watcher
            .notify(Domain::Updates, records.clone(), now())
            .await
            .unwrap();
        let second = h
            .watcher
            .notify(Domain::Updates, records, now())
            .await
            .unwrap();

        assert_eq!(first.sent, 1);
        assert_eq!(second.sent, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(h.channel.calls("1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_snapshot_is_a_silent_baseline() {
        let h = harness(config(&[Domain::Campaigns]), &["1"]).await;
        h.fetcher.push(Domain::Campaigns, vec![campaign(1, "Spring")]);
        h.fetcher
            .push(Domain::Campaigns, vec![campaign(1, "Spring"), campaign(2, "Summer")]);

        let first = h.watcher.run_cycle(now()).await.unwrap();
        assert!(first.succeeded[0].baseline);
        assert!(h.channel.delivered().is_empty());

        let second = h.watcher.run_cycle(now()).await.unwrap();
        assert_eq!(second.change_count(), 1);
        assert_eq!(second.succeeded[0].notify.delayed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_domain_does_not_abort_others() {
        let h = harness(config(&[Domain::Updates, Domain::Campaigns]), &["1"]).await;
        let previous = vec![campaign(7, "Kept")];
        h.watcher
            .snapshots()
            .save(Domain::Campaigns, previous.clone(), now())
            .await
            .unwrap();
        h.fetcher.fail(Domain::Updates, "connection reset");
        h.fetcher.push(Domain::Campaigns, vec![campaign(8, "Fresh")]);

        let report = h.watcher.run_cycle(now()).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed[0].domain, Domain::Updates);
        assert_eq!(report.succeeded[0].domain, Domain::Campaigns);
        assert_eq!(h.fetcher.calls(Domain::Campaigns), 1);

        let saved = h.watcher.snapshots().load(Domain::Campaigns).await.unwrap();
        assert_eq!(saved.records, vec![campaign(8, "Fresh"), campaign(7, "Kept")]);
        assert!(h.watcher.snapshots().load(Domain::Updates).await.is_none());
        assert!(report.to_string().contains("1 failed (updates)"));
    }

    #[tokio::test(start_paused = true)]
    async fn excluded_campaign_types_are_stored_not_sent() {
        let mut config = config(&[Domain::Campaigns]);
        config.dispatch.delayed_domains.clear();
        let h = harness(config, &["1"]).await;
        h.watcher
            .snapshots()
            .save(Domain::Campaigns, vec![], now())
            .await
            .unwrap();

        let mut promo = campaign(4, "Special");
        if let Record::Campaign(c) = &mut promo {
            c.campaign_type = Some(4);
        }
        h.fetcher
            .push(Domain::Campaigns, vec![promo.clone(), campaign(5, "Normal")]);

        let report = h.watcher.run_cycle(now()).await.unwrap();
        let notify = report.succeeded[0].notify;
        assert_eq!(notify.sent, 1);
        assert_eq!(notify.skipped, 1);
        assert_eq!(h.channel.delivered().len(), 1);
        assert!(!h.watcher.is_sent(&promo.record_id()).await);

        let saved = h.watcher.snapshots().load(Domain::Campaigns).await.unwrap();
        assert_eq!(saved.records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_domain_goes_to_privileged_first() {
        let mut config = config(&[Domain::Campaigns]);
        config.dispatch.privileged_recipients = vec!["admin".into()];
        let h = harness(config, &["admin", "user"]).await;
        let record = campaign(9, "Autumn");

        let outcome = h
            .watcher
            .notify(Domain::Campaigns, vec![record.clone()], now())
            .await
            .unwrap();
        assert_eq!(outcome.delayed, 1);
        assert_eq!(h.channel.delivered_to("admin").len(), 1);
        assert!(h.channel.delivered_to("user").is_empty());
        assert!(!h.watcher.is_sent(&record.record_id()).await);

        // Rediscovered before release: not queued twice.
        let again = h
            .watcher
            .notify(Domain::Campaigns, vec![record.clone()], now())
            .await
            .unwrap();
        assert_eq!(again.skipped, 1);

        let early = h
            .watcher
            .run_deferred(now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(early.released, 0);

        let due = h
            .watcher
            .run_deferred(now() + chrono::Duration::hours(5))
            .await
            .unwrap();
        assert_eq!(due.released, 1);
        assert_eq!(h.channel.delivered_to("admin").len(), 1);
        assert_eq!(h.channel.delivered_to("user").len(), 1);
        assert!(h.watcher.is_sent(&record.record_id()).await);
        assert_eq!(h.watcher.stats().await.pending_items, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn edited_pending_record_is_released_once() {
        let mut config = config(&[Domain::Campaigns]);
        config.dispatch.privileged_recipients = vec!["admin".into()];
        let h = harness(config, &["admin", "user"]).await;
        let original = campaign(9, "Autumn");
        let edited = campaign(9, "Autumn v2");

        h.watcher
            .notify(Domain::Campaigns, vec![original.clone()], now())
            .await
            .unwrap();
        let outcome = h
            .watcher
            .notify(
                Domain::Campaigns,
                vec![edited.clone()],
                now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(outcome.delayed, 1);
        assert_eq!(h.watcher.stats().await.pending_items, 1);
        assert_eq!(h.channel.delivered_to("admin").len(), 2);

        let due = h
            .watcher
            .run_deferred(now() + chrono::Duration::hours(5))
            .await
            .unwrap();
        assert_eq!(due.released, 1);
        let user = h.channel.delivered_to("user");
        assert_eq!(user.len(), 1);
        assert!(user[0].contains("Autumn v2"));
        assert!(h.watcher.is_sent(&edited.record_id()).await);
        assert!(!h.watcher.is_sent(&original.record_id()).await);
        assert_eq!(h.watcher.stats().await.pending_items, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_tick_replays_failed_messages() {
        let mut config = config(&[Domain::Updates]);
        config.dispatch.max_attempts = 1;
        let h = harness(config, &["1"]).await;
        h.channel
            .script("1", Err(DeliveryError::Transient("timeout".into())));

        let record = update(2, "2024-06-01", "active");
        let outcome = h
            .watcher
            .notify(Domain::Updates, vec![record.clone()], now())
            .await
            .unwrap();
        assert_eq!(outcome.delivery.deferred, 1);
        // Every recipient was attempted, so the record counts as sent.
        assert!(h.watcher.is_sent(&record.record_id()).await);

        let deferred = h.watcher.run_deferred(now()).await.unwrap();
        assert_eq!(deferred.replay.delivered, 1);
        assert_eq!(h.channel.delivered_to("1").len(), 1);
    }

    #[tokio::test]
    async fn refresh_reports_running_cycle() {
        let h = harness(config(&[Domain::Updates]), &[]).await;
        let _guard = h.watcher.state.lock().await;

        let status = h.watcher.refresh(now()).await;
        assert_eq!(status, RefreshStatus::AlreadyRunning);
        assert!(status.to_string().contains("already running"));
        assert!(matches!(
            h.watcher.run_deferred(now()).await,
            Err(AppError::CycleInProgress)
        ));
    }
}
