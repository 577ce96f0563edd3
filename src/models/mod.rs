// src/models/mod.rs

//! Domain models for the watcher application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod message;
mod recipient;
mod record;

// Re-export all public types
pub use config::{
    ChannelConfig, ChannelKind, Config, DispatchConfig, DomainSchedule, DomainsConfig,
    FeedSource, LenderSource, LoggingConfig, PollWindow, RegistryConfig, RetryConfig,
    ScheduleConfig, SourcesConfig, TemplateConfig,
};
pub use message::{FailedMessage, PendingDelayedItem};
pub use recipient::Recipient;
pub use record::{
    CampaignRecord, DocumentRecord, Domain, NewsRecord, Record, RecordId, Tracked, UpdateRecord,
};
