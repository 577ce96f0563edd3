//! Should-poll predicate, per-domain cadence and failure backoff.

use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};

use crate::models::{Domain, DomainSchedule, PollWindow, ScheduleConfig};

/// Outcome of the should-poll predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    /// Inside a regular polling window
    Scheduled,
    /// Outside the windows, but a snapshot is too old during business hours
    StaleRecovery {
        domain: Domain,
        /// `None` when the domain was never captured
        age: Option<Duration>,
    },
    /// Nothing to do this tick
    Skip,
}

impl PollDecision {
    pub fn should_poll(&self) -> bool {
        !matches!(self, PollDecision::Skip)
    }
}

/// Time-window policy evaluated in the configured UTC offset.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    config: ScheduleConfig,
    offset: FixedOffset,
}

impl SchedulePolicy {
    pub fn new(config: ScheduleConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| {
            log::warn!(
                "utc_offset_minutes {} is out of range; using UTC",
                config.utc_offset_minutes
            );
            Utc.fix()
        });
        Self { config, offset }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    fn override_for(&self, domain: Domain) -> Option<&DomainSchedule> {
        self.config.per_domain.iter().find(|o| o.domain == domain)
    }

    /// Windows that apply to `domain`.
    pub fn windows_for(&self, domain: Domain) -> &[PollWindow] {
        match self.override_for(domain) {
            Some(o) if !o.windows.is_empty() => &o.windows,
            _ => &self.config.windows,
        }
    }

    /// True inside any of the domain's weekday/hour windows.
    pub fn in_window(&self, domain: Domain, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        self.windows_for(domain).iter().any(|w| {
            w.days.contains(&local.weekday()) && w.hours.contains(&local.hour())
        })
    }

    /// Wait before polling `domain` again after a successful poll.
    pub fn poll_interval(&self, domain: Domain) -> Duration {
        self.override_for(domain)
            .and_then(|o| o.interval_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.long_sleep())
    }

    /// True inside the broader business band used for staleness recovery.
    pub fn in_business_hours(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        self.config.business_days.contains(&local.weekday())
            && (self.config.business_start_hour..=self.config.business_end_hour)
                .contains(&local.hour())
    }

    pub fn staleness_ceiling(&self) -> Duration {
        Duration::from_secs(self.config.staleness_hours * 3600)
    }

    /// Decide whether to poll one domain whose snapshot is `age` old.
    pub fn decide(&self, domain: Domain, now: DateTime<Utc>, age: Option<Duration>) -> PollDecision {
        if self.in_window(domain, now) {
            return PollDecision::Scheduled;
        }
        if !self.in_business_hours(now) {
            return PollDecision::Skip;
        }
        if age.is_none_or(|a| a > self.staleness_ceiling()) {
            PollDecision::StaleRecovery { domain, age }
        } else {
            PollDecision::Skip
        }
    }

    /// Domains that should be polled now, with the reason for each.
    pub fn due_domains(
        &self,
        now: DateTime<Utc>,
        ages: &[(Domain, Option<Duration>)],
    ) -> Vec<(Domain, PollDecision)> {
        ages.iter()
            .map(|&(domain, age)| (domain, self.decide(domain, now, age)))
            .filter(|(_, decision)| decision.should_poll())
            .collect()
    }

    /// Sleep after the `consecutive_errors`-th failed cycle.
    ///
    /// Grows linearly with the error count and never exceeds `max_backoff_secs`.
    pub fn failure_delay(&self, consecutive_errors: u32) -> Duration {
        let secs = self
            .config
            .cooldown_secs
            .saturating_mul(u64::from(consecutive_errors.max(1)));
        Duration::from_secs(secs.min(self.config.max_backoff_secs))
    }

    /// Whether the error count has reached the extended-backoff ceiling.
    pub fn is_extended(&self, consecutive_errors: u32) -> bool {
        consecutive_errors >= self.config.max_consecutive_errors
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.config.idle_interval_secs)
    }

    pub fn long_sleep(&self) -> Duration {
        Duration::from_secs(self.config.long_sleep_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 2024-03-04 is a Monday, 2024-03-09 a Saturday.
    fn monday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 30, 0).unwrap()
    }

    fn saturday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, hour, 30, 0).unwrap()
    }

    fn policy() -> SchedulePolicy {
        SchedulePolicy::new(ScheduleConfig::default())
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn polls_inside_window() {
        let p = policy();
        let fresh = Some(HOUR);
        assert_eq!(p.decide(Domain::Updates, monday(15), fresh), PollDecision::Scheduled);
        assert_eq!(p.decide(Domain::Updates, monday(17), fresh), PollDecision::Scheduled);
        assert_eq!(p.decide(Domain::Updates, monday(18), fresh), PollDecision::Skip);
        assert_eq!(p.decide(Domain::Updates, saturday(15), fresh), PollDecision::Skip);
    }

    #[test]
    fn stale_snapshot_forces_poll_in_business_hours() {
        let age = Some(30 * HOUR);
        let decision = policy().decide(Domain::Documents, monday(10), age);
        assert_eq!(
            decision,
            PollDecision::StaleRecovery {
                domain: Domain::Documents,
                age,
            }
        );
        assert!(decision.should_poll());
    }

    #[test]
    fn stale_snapshot_waits_outside_business_hours() {
        let age = Some(30 * HOUR);
        assert_eq!(policy().decide(Domain::Updates, monday(20), age), PollDecision::Skip);
        assert_eq!(policy().decide(Domain::Updates, saturday(10), age), PollDecision::Skip);
    }

    #[test]
    fn missing_snapshot_counts_as_stale() {
        assert!(policy().decide(Domain::Documents, monday(9), None).should_poll());
    }

    #[test]
    fn campaigns_follow_their_own_windows() {
        let p = policy();
        assert!(p.in_window(Domain::Campaigns, monday(7)));
        assert!(!p.in_window(Domain::Updates, monday(7)));
        assert!(!p.in_window(Domain::Campaigns, monday(20)));
        assert!(p.in_window(Domain::News, monday(22)));
        assert!(!p.in_window(Domain::Campaigns, saturday(10)));

        assert_eq!(p.poll_interval(Domain::Campaigns), Duration::from_secs(600));
        assert_eq!(p.poll_interval(Domain::News), Duration::from_secs(900));
        assert_eq!(p.poll_interval(Domain::Updates), p.long_sleep());
    }

    #[test]
    fn due_domains_keeps_only_pollable_ones() {
        let ages = vec![
            (Domain::Updates, Some(HOUR)),
            (Domain::Documents, Some(30 * HOUR)),
            (Domain::Campaigns, Some(HOUR)),
        ];
        let due = policy().due_domains(monday(10), &ages);
        let domains: Vec<Domain> = due.iter().map(|(d, _)| *d).collect();
        assert_eq!(domains, vec![Domain::Documents, Domain::Campaigns]);
        assert_eq!(due[1].1, PollDecision::Scheduled);
    }

    #[test]
    fn override_without_windows_uses_global_ones() {
        let mut config = ScheduleConfig::default();
        config.per_domain = vec![DomainSchedule {
            domain: Domain::Updates,
            windows: Vec::new(),
            interval_secs: Some(120),
        }];
        let p = SchedulePolicy::new(config);
        assert!(p.in_window(Domain::Updates, monday(15)));
        assert!(!p.in_window(Domain::Updates, monday(7)));
        assert_eq!(p.poll_interval(Domain::Updates), Duration::from_secs(120));
    }

    #[test]
    fn utc_offset_shifts_windows() {
        let mut config = ScheduleConfig::default();
        config.utc_offset_minutes = 120;
        let policy = SchedulePolicy::new(config);
        // 13:30 UTC is 15:30 local
        assert!(policy.in_window(Domain::Updates, monday(13)));
        assert!(!policy.in_window(Domain::Updates, monday(16)));
    }

    #[test]
    fn failure_delay_grows_then_caps() {
        let policy = policy();
        let delays: Vec<Duration> = (1..=30).map(|n| policy.failure_delay(n)).collect();
        let cap = Duration::from_secs(policy.config().max_backoff_secs);

        for pair in delays.windows(2) {
            if pair[0] < cap {
                assert!(pair[1] > pair[0]);
            }
            assert!(pair[1] <= cap);
        }
        assert_eq!(delays[0], Duration::from_secs(180));
        assert_eq!(*delays.last().unwrap(), cap);
    }

    #[test]
    fn extended_backoff_starts_at_ceiling() {
        let policy = policy();
        assert!(!policy.is_extended(2));
        assert!(policy.is_extended(3));
    }
}
