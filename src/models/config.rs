//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::retry::RetryPolicy;

use super::Domain;

/// Environment variable overriding `[channel].url`.
pub const ENV_CHANNEL_URL: &str = "LENDWATCH_CHANNEL_URL";
/// Environment variable overriding `[channel].token`.
pub const ENV_CHANNEL_TOKEN: &str = "LENDWATCH_CHANNEL_TOKEN";
/// Environment variable overriding `[sources].api_base`.
pub const ENV_API_BASE: &str = "LENDWATCH_API_BASE";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log verbosity
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where records are fetched from
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Retry policy applied to every fetch request
    #[serde(default)]
    pub fetch_retry: RetryConfig,

    /// Polling windows and scheduler intervals
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Delivery pacing and retry behaviour
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Sent-registry growth control
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Which domains are tracked and how
    #[serde(default)]
    pub domains: DomainsConfig,

    /// Outbound notification channel
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Message templates per domain
    #[serde(default)]
    pub templates: TemplateConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_CHANNEL_URL).filter(|v| !v.trim().is_empty()) {
            self.channel.url = Some(url);
        }
        if let Some(token) = lookup(ENV_CHANNEL_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.channel.token = Some(token);
        }
        if let Some(base) = lookup(ENV_API_BASE).filter(|v| !v.trim().is_empty()) {
            self.sources.api_base = base;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.sources.user_agent.trim().is_empty() {
            return Err(AppError::validation("sources.user_agent is empty"));
        }
        if self.sources.timeout_secs == 0 {
            return Err(AppError::validation("sources.timeout_secs must be > 0"));
        }
        if self.sources.max_concurrent == 0 {
            return Err(AppError::validation("sources.max_concurrent must be > 0"));
        }
        url::Url::parse(&self.sources.api_base)?;

        if self.fetch_retry.max_attempts == 0 {
            return Err(AppError::validation("fetch_retry.max_attempts must be > 0"));
        }
        if self.fetch_retry.max_retry_after_secs == 0 || self.dispatch.max_retry_after_secs == 0 {
            return Err(AppError::validation("max_retry_after_secs must be > 0"));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(AppError::validation("dispatch.max_attempts must be > 0"));
        }
        if self.dispatch.max_delay_multiple < 1.0 {
            return Err(AppError::validation(
                "dispatch.max_delay_multiple must be >= 1.0",
            ));
        }
        if self.registry.max_entries == 0 {
            return Err(AppError::validation("registry.max_entries must be > 0"));
        }

        let schedule = &self.schedule;
        if schedule.windows.is_empty() {
            return Err(AppError::validation("schedule.windows is empty"));
        }
        for window in &schedule.windows {
            if window.days.is_empty() || window.hours.is_empty() {
                return Err(AppError::validation(
                    "schedule.windows entries need at least one day and one hour",
                ));
            }
            if window.hours.iter().any(|h| *h > 23) {
                return Err(AppError::validation("schedule.windows hours must be 0-23"));
            }
        }
        if schedule.business_start_hour > 23 || schedule.business_end_hour > 23 {
            return Err(AppError::validation("schedule business hours must be 0-23"));
        }
        if schedule.business_start_hour > schedule.business_end_hour {
            return Err(AppError::validation(
                "schedule.business_start_hour must not exceed business_end_hour",
            ));
        }
        if schedule.idle_interval_secs == 0 || schedule.cooldown_secs == 0 {
            return Err(AppError::validation(
                "schedule idle and cooldown intervals must be > 0",
            ));
        }
        if schedule.max_backoff_secs < schedule.cooldown_secs {
            return Err(AppError::validation(
                "schedule.max_backoff_secs must be >= cooldown_secs",
            ));
        }
        if schedule.max_consecutive_errors == 0 {
            return Err(AppError::validation(
                "schedule.max_consecutive_errors must be > 0",
            ));
        }

        for (i, entry) in schedule.per_domain.iter().enumerate() {
            if entry.interval_secs == Some(0) {
                return Err(AppError::validation(format!(
                    "schedule.per_domain[{i}] ({}) interval_secs must be > 0",
                    entry.domain
                )));
            }
            if schedule.per_domain[..i].iter().any(|e| e.domain == entry.domain) {
                return Err(AppError::validation(format!(
                    "schedule.per_domain lists {} twice",
                    entry.domain
                )));
            }
            for window in &entry.windows {
                if window.days.is_empty() || window.hours.is_empty() {
                    return Err(AppError::validation(format!(
                        "schedule.per_domain {} windows need at least one day and one hour",
                        entry.domain
                    )));
                }
                if window.hours.iter().any(|h| *h > 23) {
                    return Err(AppError::validation(format!(
                        "schedule.per_domain {} window hours must be 0-23",
                        entry.domain
                    )));
                }
            }
        }

        if self.domains.enabled.is_empty() {
            return Err(AppError::validation("No domains enabled"));
        }
        if self.domains.enabled.contains(&Domain::Documents)
            && self
                .sources
                .documents_url
                .as_deref()
                .is_none_or(|u| u.trim().is_empty())
        {
            return Err(AppError::config(
                "documents domain is enabled but sources.documents_url is not set",
            ));
        }
        if let Some(url) = self.sources.documents_url.as_deref().filter(|u| !u.trim().is_empty()) {
            url::Url::parse(url)?;
        }
        if self.domains.enabled.contains(&Domain::News) && self.sources.feeds.is_empty() {
            return Err(AppError::config(
                "news domain is enabled but no sources.feeds are configured",
            ));
        }
        for (i, feed) in self.sources.feeds.iter().enumerate() {
            if feed.id.trim().is_empty() {
                return Err(AppError::validation("sources.feeds entries need an id"));
            }
            if self.sources.feeds[..i].iter().any(|f| f.id == feed.id) {
                return Err(AppError::validation(format!(
                    "sources.feeds lists '{}' twice",
                    feed.id
                )));
            }
            url::Url::parse(&feed.url)?;
        }

        if self.channel.kind == ChannelKind::Webhook {
            if self.channel.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                return Err(AppError::config(format!(
                    "webhook channel requires channel.url or {ENV_CHANNEL_URL}"
                )));
            }
            if self.channel.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
                return Err(AppError::config(format!(
                    "webhook channel requires channel.token or {ENV_CHANNEL_TOKEN}"
                )));
            }
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// A lending company whose recovery updates are tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LenderSource {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// An RSS feed polled for the news domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    /// Short id recipients subscribe to
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    /// Items must mention one of these (case-insensitive); empty keeps all
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl FeedSource {
    /// Whether an item with this title and issuer passes the keyword filter.
    pub fn matches(&self, title: &str, issuer: Option<&str>) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let haystack = format!("{} {}", title, issuer.unwrap_or_default()).to_lowercase();
        self.keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && haystack.contains(&k))
    }
}

/// HTTP sources and request behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Base URL of the lending-platform API
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum concurrent requests
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Lenders polled for recovery updates
    #[serde(default)]
    pub lenders: Vec<LenderSource>,

    /// Campaign listing path relative to `api_base`
    #[serde(default = "defaults::campaigns_path")]
    pub campaigns_path: String,

    /// JSON feed of company documents (produced by the page scraper)
    #[serde(default)]
    pub documents_url: Option<String>,

    /// RSS feeds for the news domain
    #[serde(default)]
    pub feeds: Vec<FeedSource>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
            lenders: Vec::new(),
            campaigns_path: defaults::campaigns_path(),
            documents_url: None,
            feeds: Vec::new(),
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "defaults::fetch_retry_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "defaults::fetch_retry_max_delay")]
    pub max_delay_ms: u64,

    /// Ceiling on a server's `Retry-After`
    #[serde(default = "defaults::max_retry_after")]
    pub max_retry_after_secs: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_max_retry_after(Duration::from_secs(self.max_retry_after_secs))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::fetch_retry_delay(),
            max_delay_ms: defaults::fetch_retry_max_delay(),
            max_retry_after_secs: defaults::max_retry_after(),
        }
    }
}

/// A set of weekdays and hours during which polling is due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollWindow {
    pub days: Vec<Weekday>,
    pub hours: Vec<u32>,
}

/// Cadence override for one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSchedule {
    pub domain: Domain,

    /// Windows replacing the global ones; empty keeps the global windows
    #[serde(default)]
    pub windows: Vec<PollWindow>,

    /// Re-poll interval after a successful poll; unset means `long_sleep_secs`
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// Scheduler policy and intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Regular polling windows
    #[serde(default = "defaults::windows")]
    pub windows: Vec<PollWindow>,

    /// Days on which the staleness recovery path may fire
    #[serde(default = "defaults::weekdays")]
    pub business_days: Vec<Weekday>,

    /// First hour (inclusive) of the business band
    #[serde(default = "defaults::business_start")]
    pub business_start_hour: u32,

    /// Last hour (inclusive) of the business band
    #[serde(default = "defaults::business_end")]
    pub business_end_hour: u32,

    /// Snapshot age that forces a recovery poll
    #[serde(default = "defaults::staleness_hours")]
    pub staleness_hours: u64,

    /// Re-evaluation interval while idle
    #[serde(default = "defaults::idle_interval")]
    pub idle_interval_secs: u64,

    /// Pause after a failed cycle
    #[serde(default = "defaults::cooldown")]
    pub cooldown_secs: u64,

    /// Pause after a successful cycle
    #[serde(default = "defaults::long_sleep")]
    pub long_sleep_secs: u64,

    /// Failures tolerated before switching to extended backoff
    #[serde(default = "defaults::max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Upper bound of the extended backoff
    #[serde(default = "defaults::max_backoff")]
    pub max_backoff_secs: u64,

    /// Offset applied to UTC before evaluating windows
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Per-domain windows and intervals
    #[serde(default = "defaults::per_domain")]
    pub per_domain: Vec<DomainSchedule>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            windows: defaults::windows(),
            business_days: defaults::weekdays(),
            business_start_hour: defaults::business_start(),
            business_end_hour: defaults::business_end(),
            staleness_hours: defaults::staleness_hours(),
            idle_interval_secs: defaults::idle_interval(),
            cooldown_secs: defaults::cooldown(),
            long_sleep_secs: defaults::long_sleep(),
            max_consecutive_errors: defaults::max_consecutive_errors(),
            max_backoff_secs: defaults::max_backoff(),
            utc_offset_minutes: 0,
            per_domain: defaults::per_domain(),
        }
    }
}

/// Delivery pacing, retry and fan-out rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Pause after every successful send
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    /// Extra pause per 1000 characters of message text
    #[serde(default = "defaults::delay_per_kchar")]
    pub delay_per_kchar_ms: u64,

    /// Cap on the adaptive pause, as a multiple of `base_delay_ms`
    #[serde(default = "defaults::max_delay_multiple")]
    pub max_delay_multiple: f64,

    /// Immediate attempts on transient errors
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// First backoff step for transient errors
    #[serde(default = "defaults::dispatch_retry_delay")]
    pub retry_base_delay_ms: u64,

    /// Added on top of a provider's retry-after
    #[serde(default = "defaults::rate_limit_buffer")]
    pub rate_limit_buffer_ms: u64,

    /// Ceiling on a provider's retry-after
    #[serde(default = "defaults::max_retry_after")]
    pub max_retry_after_secs: u64,

    /// Replay rounds before a failed message is dropped
    #[serde(default = "defaults::replay_limit")]
    pub replay_limit: u32,

    /// Recipients notified immediately for delayed domains
    #[serde(default)]
    pub privileged_recipients: Vec<String>,

    /// Domains whose broad delivery is delayed
    #[serde(default = "defaults::delayed_domains")]
    pub delayed_domains: Vec<Domain>,

    /// Delay before broad delivery, in hours
    #[serde(default = "defaults::delay_hours")]
    pub delay_hours: u64,
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_base_delay_ms.saturating_mul(8)),
        )
        .with_rate_limit_buffer(Duration::from_millis(self.rate_limit_buffer_ms))
        .with_max_retry_after(Duration::from_secs(self.max_retry_after_secs))
    }

    pub fn is_privileged(&self, recipient_id: &str) -> bool {
        self.privileged_recipients.iter().any(|p| p == recipient_id)
    }

    pub fn is_delayed(&self, domain: Domain) -> bool {
        self.delayed_domains.contains(&domain)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: defaults::base_delay(),
            delay_per_kchar_ms: defaults::delay_per_kchar(),
            max_delay_multiple: defaults::max_delay_multiple(),
            max_attempts: defaults::max_attempts(),
            retry_base_delay_ms: defaults::dispatch_retry_delay(),
            rate_limit_buffer_ms: defaults::rate_limit_buffer(),
            max_retry_after_secs: defaults::max_retry_after(),
            replay_limit: defaults::replay_limit(),
            privileged_recipients: Vec::new(),
            delayed_domains: defaults::delayed_domains(),
            delay_hours: defaults::delay_hours(),
        }
    }
}

/// Sent-registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Entries kept before the oldest are pruned
    #[serde(default = "defaults::registry_max_entries")]
    pub max_entries: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_entries: defaults::registry_max_entries(),
        }
    }
}

/// Domain selection and notification filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainsConfig {
    /// Domains polled each cycle, in this order
    #[serde(default = "defaults::enabled_domains")]
    pub enabled: Vec<Domain>,

    /// Notify on a domain's very first snapshot
    #[serde(default)]
    pub notify_on_first_snapshot: bool,

    /// Campaign types that are stored but never notified
    #[serde(default = "defaults::excluded_campaign_types")]
    pub excluded_campaign_types: Vec<i64>,
}

impl DomainsConfig {
    /// Enabled domains in the fixed processing order.
    pub fn ordered(&self) -> Vec<Domain> {
        Domain::ALL
            .into_iter()
            .filter(|d| self.enabled.contains(d))
            .collect()
    }
}

impl Default for DomainsConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled_domains(),
            notify_on_first_snapshot: false,
            excluded_campaign_types: defaults::excluded_campaign_types(),
        }
    }
}

/// Outbound channel implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Write messages to the log only
    #[default]
    Log,
    /// POST messages to an HTTP endpoint
    Webhook,
}

/// Notification channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub kind: ChannelKind,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::default(),
            url: None,
            token: None,
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Message templates, see [`crate::models::Record::render`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default = "defaults::update_template")]
    pub update: String,

    #[serde(default = "defaults::document_template")]
    pub document: String,

    #[serde(default = "defaults::campaign_template")]
    pub campaign: String,

    #[serde(default = "defaults::news_template")]
    pub news: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            update: defaults::update_template(),
            document: defaults::document_template(),
            campaign: defaults::campaign_template(),
            news: defaults::news_template(),
        }
    }
}

mod defaults {
    use chrono::Weekday;

    use super::{DomainSchedule, PollWindow};
    use crate::models::Domain;

    pub fn log_level() -> String {
        "info".into()
    }

    // Source defaults
    pub fn api_base() -> String {
        "https://www.mintos.com/webapp/api/marketplace-api/v1".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; lendwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        100
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn campaigns_path() -> String {
        "campaigns".into()
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn fetch_retry_delay() -> u64 {
        5_000
    }
    pub fn fetch_retry_max_delay() -> u64 {
        60_000
    }
    pub fn max_retry_after() -> u64 {
        5 * 60
    }

    // Schedule defaults
    pub fn weekdays() -> Vec<Weekday> {
        vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ]
    }
    pub fn windows() -> Vec<PollWindow> {
        vec![PollWindow {
            days: weekdays(),
            hours: vec![15, 16, 17],
        }]
    }
    pub fn business_start() -> u32 {
        9
    }
    pub fn business_end() -> u32 {
        18
    }
    pub fn staleness_hours() -> u64 {
        24
    }
    pub fn idle_interval() -> u64 {
        5 * 60
    }
    pub fn cooldown() -> u64 {
        3 * 60
    }
    pub fn long_sleep() -> u64 {
        55 * 60
    }
    pub fn max_consecutive_errors() -> u32 {
        3
    }
    pub fn max_backoff() -> u64 {
        60 * 60
    }
    pub fn per_domain() -> Vec<DomainSchedule> {
        vec![
            DomainSchedule {
                domain: Domain::Campaigns,
                windows: vec![PollWindow {
                    days: weekdays(),
                    hours: (6..20).collect(),
                }],
                interval_secs: Some(10 * 60),
            },
            DomainSchedule {
                domain: Domain::News,
                windows: vec![PollWindow {
                    days: weekdays(),
                    hours: (6..=22).collect(),
                }],
                interval_secs: Some(15 * 60),
            },
        ]
    }

    // Dispatch defaults
    pub fn base_delay() -> u64 {
        2_000
    }
    pub fn delay_per_kchar() -> u64 {
        1_000
    }
    pub fn max_delay_multiple() -> f64 {
        2.5
    }
    pub fn dispatch_retry_delay() -> u64 {
        1_000
    }
    pub fn rate_limit_buffer() -> u64 {
        1_000
    }
    pub fn replay_limit() -> u32 {
        5
    }
    pub fn delayed_domains() -> Vec<Domain> {
        vec![Domain::Campaigns]
    }
    pub fn delay_hours() -> u64 {
        4
    }

    pub fn registry_max_entries() -> usize {
        10_000
    }

    // Domain defaults
    pub fn enabled_domains() -> Vec<Domain> {
        // Documents and news need a source URL, so they are opt-in.
        vec![Domain::Updates, Domain::Campaigns]
    }
    pub fn excluded_campaign_types() -> Vec<i64> {
        // Special promotions
        vec![4]
    }

    // Template defaults
    pub fn update_template() -> String {
        "🏢 {company}\n📅 {date} ({status})\n\n{description}\n\nRecovered: {recovered} | Remaining: {remaining}".into()
    }
    pub fn document_template() -> String {
        "📄 New {doc_type} from {company}\n{title}\n📅 {date}\n🔗 {url}".into()
    }
    pub fn campaign_template() -> String {
        "🎯 {name}\n{description}\n\n📅 {valid_from} → {valid_to}\n💰 Bonus: {bonus}\n🔗 {terms}".into()
    }
    pub fn news_template() -> String {
        "📰 {feed}\n\n{issuer}\n{title}\n\n📅 {published}\n🔗 {link}".into()
    }
}
