//! Long-lived polling loop.
//!
//! ```text
//! Idle ──should-poll──▶ Polling ──ok──▶ LongSleep ──▶ Idle
//!  ▲                       │
//!  │                       └─failed─▶ Cooldown / Backoff ──▶ Idle
//!  └──── idle interval ────┘
//! ```
//!
//! Each domain keeps its own next-due instant, so a domain with a short
//! interval is re-polled while slower ones wait. A failed domain has no
//! due instant and is retried after the cooldown.
//!
//! Every sleep races the cancellation token; a cycle that already started
//! is allowed to finish.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::Domain;
use crate::services::ReplayReport;

use super::cycle::Watcher;
use super::schedule::SchedulePolicy;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    /// Short pause after a failed cycle
    Cooldown,
    /// Error ceiling reached; scaled pause, then the counter resets
    Backoff,
    /// Pause after a successful cycle
    LongSleep,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Polling => "polling",
            SchedulerState::Cooldown => "cooldown",
            SchedulerState::Backoff => "backoff",
            SchedulerState::LongSleep => "long sleep",
        };
        f.write_str(name)
    }
}

/// Source of wall-clock time, swappable in tests.
pub type Clock = fn() -> DateTime<Utc>;

/// Drives [`Watcher`] cycles according to a [`SchedulePolicy`].
pub struct Scheduler {
    watcher: Arc<Watcher>,
    policy: SchedulePolicy,
    cancel: CancellationToken,
    clock: Clock,
    state: SchedulerState,
    consecutive_errors: u32,
    next_due: HashMap<Domain, Instant>,
}

impl Scheduler {
    pub fn new(watcher: Arc<Watcher>, policy: SchedulePolicy, cancel: CancellationToken) -> Self {
        Self {
            watcher,
            policy,
            cancel,
            clock: Utc::now,
            state: SchedulerState::Idle,
            consecutive_errors: 0,
            next_due: HashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            log::debug!("Scheduler: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Record a cycle outcome and pick the next state and sleep.
    pub fn after_cycle(&mut self, success: bool) -> (SchedulerState, Duration) {
        if success {
            self.consecutive_errors = 0;
            return (SchedulerState::LongSleep, self.policy.long_sleep());
        }

        self.consecutive_errors += 1;
        let delay = self.policy.failure_delay(self.consecutive_errors);
        if self.policy.is_extended(self.consecutive_errors) {
            log::error!(
                "{} consecutive failed cycles; backing off for {}s",
                self.consecutive_errors,
                delay.as_secs()
            );
            self.consecutive_errors = 0;
            (SchedulerState::Backoff, delay)
        } else {
            log::warn!(
                "Cycle failed ({} in a row); retrying in {}s",
                self.consecutive_errors,
                delay.as_secs()
            );
            (SchedulerState::Cooldown, delay)
        }
    }

    fn is_due(&self, domain: Domain, tick: Instant) -> bool {
        self.next_due.get(&domain).is_none_or(|at| *at <= tick)
    }

    /// Time until the earliest future due instant, if any.
    fn until_next_due(&self) -> Option<Duration> {
        let now = Instant::now();
        self.next_due
            .values()
            .filter(|at| **at > now)
            .map(|at| *at - now)
            .min()
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self) {
        log::info!("Scheduler started");
        while !self.cancel.is_cancelled() {
            self.transition(SchedulerState::Idle);
            let now = (self.clock)();

            match self.watcher.run_deferred(now).await {
                Ok(report) if report.released > 0 || report.replay != ReplayReport::default() => {
                    log::info!(
                        "Deferred work: {} delayed records released, {} replayed, {} requeued",
                        report.released,
                        report.replay.delivered,
                        report.replay.requeued
                    );
                }
                Ok(_) | Err(AppError::CycleInProgress) => {}
                Err(e) => log::error!("Deferred work failed: {e}"),
            }

            let tick = Instant::now();
            let ages = self.watcher.snapshot_ages(now).await;
            let due: Vec<(Domain, _)> = self
                .policy
                .due_domains(now, &ages)
                .into_iter()
                .filter(|(domain, _)| self.is_due(*domain, tick))
                .collect();
            if due.is_empty() {
                let idle = self.policy.idle_interval();
                let wait = self.until_next_due().map_or(idle, |d| d.min(idle));
                if !self.sleep(wait).await {
                    break;
                }
                continue;
            }

            let domains: Vec<Domain> = due.iter().map(|(domain, _)| *domain).collect();
            log::info!("Starting poll cycle ({due:?})");
            self.transition(SchedulerState::Polling);
            let (next, delay) = match self.watcher.run_domains(now, &domains).await {
                Ok(report) => {
                    log::info!("Cycle finished: {report}");
                    for summary in &report.succeeded {
                        let interval = self.policy.poll_interval(summary.domain);
                        self.next_due.insert(summary.domain, tick + interval);
                    }
                    let (next, delay) = self.after_cycle(report.is_success());
                    if next == SchedulerState::LongSleep {
                        (next, self.until_next_due().map_or(delay, |d| d.min(delay)))
                    } else {
                        (next, delay)
                    }
                }
                Err(AppError::CycleInProgress) => {
                    log::info!("A manual refresh is running; skipping this tick");
                    (SchedulerState::Idle, self.policy.idle_interval())
                }
                Err(e) => {
                    log::error!("Cycle aborted: {e}");
                    self.after_cycle(false)
                }
            };

            self.transition(next);
            if !self.sleep(delay).await {
                break;
            }
        }
        log::info!("Scheduler stopped");
    }
}
