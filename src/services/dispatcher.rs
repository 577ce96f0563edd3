//! Notification delivery with pacing, retries and a deferred queue.
//!
//! - Rate limits are always honoured and retried without a cap
//! - Transient errors get a few immediate retries, then the message is
//!   parked in the failed queue for replay on a later tick
//! - Permanent errors remove the recipient
//! - Every successful send is followed by a pause that grows with the
//!   message length

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{DispatchConfig, Domain, FailedMessage, Recipient, Record};
use crate::storage::{FailedQueue, RecipientStore};
use crate::utils::retry::{RetryError, RetryPolicy, retry};

use super::channel::{DeliveryError, NotificationChannel};

/// Tally of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Parked in the failed queue
    pub deferred: usize,
    /// Recipients dropped after a permanent error
    pub removed: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.deferred + self.removed
    }

    pub fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.deferred += other.deferred;
        self.removed += other.removed;
    }
}

/// Tally of one failed-queue replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

/// Owns the recipient set, the failed queue and the outbound channel.
pub struct Dispatcher {
    channel: Arc<dyn NotificationChannel>,
    config: DispatchConfig,
    policy: RetryPolicy,
    recipients: Mutex<RecipientStore>,
    failed: Mutex<FailedQueue>,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        config: DispatchConfig,
        recipients: RecipientStore,
        failed: FailedQueue,
    ) -> Self {
        let policy = config.retry_policy();
        Self {
            channel,
            config,
            policy,
            recipients: Mutex::new(recipients),
            failed: Mutex::new(failed),
        }
    }

    /// Abort retry waits once `cancel` fires; the message is queued instead.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.policy = self.policy.with_cancel(cancel);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Pause after a successful send of `text`.
    pub fn pacing_delay(&self, text: &str) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let kchars = text.chars().count() as f64 / 1000.0;
        let adaptive = base + kchars * self.config.delay_per_kchar_ms as f64;
        let ceiling = base * self.config.max_delay_multiple;
        Duration::from_millis(adaptive.min(ceiling).round() as u64)
    }

    async fn attempt(
        &self,
        recipient: &str,
        text: &str,
    ) -> std::result::Result<(), RetryError<DeliveryError>> {
        let label = format!("send to {recipient}");
        retry(
            &self.policy,
            &label,
            move || self.channel.send_message(recipient, text),
            DeliveryError::verdict,
        )
        .await
    }

    /// Deliver one message.
    ///
    /// On a permanent error the recipient is removed; when transient retries
    /// run out the message is queued for replay. Both still return the error.
    pub async fn send(&self, recipient: &str, text: &str) -> Result<()> {
        match self.attempt(recipient, text).await {
            Ok(()) => {
                tokio::time::sleep(self.pacing_delay(text)).await;
                Ok(())
            }
            Err(RetryError::Permanent(error)) => {
                self.drop_recipient(recipient, &error).await;
                Err(AppError::delivery(recipient, error))
            }
            Err(RetryError::Exhausted { error, attempts }) => {
                log::warn!(
                    "Delivery to {recipient} failed {attempts} times ({error}); queued for replay"
                );
                let mut failed = self.failed.lock().await;
                if let Err(e) = failed.push(FailedMessage::new(recipient, text, 0)).await {
                    log::error!("Could not persist failed-message queue: {e}");
                }
                Err(AppError::delivery(recipient, error))
            }
            Err(RetryError::Cancelled(error)) => {
                log::info!("Delivery to {recipient} interrupted by shutdown; queued for replay");
                let mut failed = self.failed.lock().await;
                if let Err(e) = failed.push(FailedMessage::new(recipient, text, 0)).await {
                    log::error!("Could not persist failed-message queue: {e}");
                }
                Err(AppError::delivery(recipient, error))
            }
        }
    }

    /// Send `text` to each recipient in order, tallying outcomes.
    pub async fn broadcast(&self, recipients: &[Recipient], text: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for recipient in recipients {
            match self.send(&recipient.id, text).await {
                Ok(()) => report.delivered += 1,
                Err(AppError::Delivery {
                    source: DeliveryError::Permanent(_),
                    ..
                }) => report.removed += 1,
                Err(_) => report.deferred += 1,
            }
        }
        report
    }

    /// Retry everything in the failed queue once.
    ///
    /// Messages that fail `replay_limit` replays are dropped.
    pub async fn replay_failed(&self) -> ReplayReport {
        let queued = self.failed.lock().await.drain();
        let mut report = ReplayReport::default();
        if queued.is_empty() {
            return report;
        }
        log::info!("Replaying {} failed messages", queued.len());

        let mut survivors = Vec::new();
        for mut message in queued {
            if self.recipients.lock().await.get(&message.recipient).is_none() {
                log::info!(
                    "Dropping queued message for removed recipient {}",
                    message.recipient
                );
                report.dropped += 1;
                continue;
            }
            match self.attempt(&message.recipient, &message.text).await {
                Ok(()) => {
                    report.delivered += 1;
                    tokio::time::sleep(self.pacing_delay(&message.text)).await;
                }
                Err(RetryError::Permanent(error)) => {
                    self.drop_recipient(&message.recipient, &error).await;
                    report.dropped += 1;
                }
                Err(RetryError::Cancelled(_)) => {
                    report.requeued += 1;
                    survivors.push(message);
                }
                Err(RetryError::Exhausted { error, .. }) => {
                    message.attempts += 1;
                    if message.attempts >= self.config.replay_limit {
                        log::error!(
                            "Giving up on message to {} after {} replays: {}",
                            message.recipient,
                            message.attempts,
                            error
                        );
                        report.dropped += 1;
                    } else {
                        report.requeued += 1;
                        survivors.push(message);
                    }
                }
            }
        }

        let mut failed = self.failed.lock().await;
        // Keep anything queued by sends that ran during the replay.
        survivors.extend(failed.drain());
        if let Err(e) = failed.replace(survivors).await {
            log::error!("Could not persist failed-message queue: {e}");
        }
        log::info!(
            "Replay finished: {} delivered, {} requeued, {} dropped",
            report.delivered,
            report.requeued,
            report.dropped
        );
        report
    }

    async fn drop_recipient(&self, recipient: &str, error: &DeliveryError) {
        log::warn!("Removing recipient {recipient}: {error}");
        if let Err(e) = self.recipients.lock().await.remove(recipient).await {
            log::error!("Could not persist removal of {recipient}: {e}");
        }
    }

    /// Recipients who want `record`, in registration order.
    pub async fn recipients_for(&self, record: &Record) -> Vec<Recipient> {
        self.recipients.lock().await.enabled_for(record)
    }

    pub async fn recipients(&self) -> Vec<Recipient> {
        self.recipients.lock().await.list().to_vec()
    }

    pub async fn register_recipient(&self, id: &str, name: Option<String>) -> Result<bool> {
        self.recipients.lock().await.register(id, name).await
    }

    pub async fn remove_recipient(&self, id: &str) -> Result<Option<Recipient>> {
        self.recipients.lock().await.remove(id).await
    }

    pub async fn toggle_preference(&self, id: &str, domain: Domain) -> Result<Option<bool>> {
        self.recipients.lock().await.toggle(id, domain).await
    }

    pub async fn toggle_feed(&self, id: &str, feed: &str) -> Result<Option<bool>> {
        self.recipients.lock().await.toggle_feed(id, feed).await
    }

    pub async fn failed_len(&self) -> usize {
        self.failed.lock().await.len()
    }
}
