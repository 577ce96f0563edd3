//! Service layer for the watcher application.
//!
//! This module contains the collaborators the pipeline talks to:
//! - Record fetching (`Fetcher`, `HttpFetcher`)
//! - RSS item extraction (`FeedParser`)
//! - Outbound channels (`NotificationChannel`, `WebhookChannel`, `LogChannel`)
//! - Paced, retrying delivery (`Dispatcher`)

mod channel;
mod dispatcher;
mod feed;
mod fetcher;

pub use channel::{
    DeliveryError, LogChannel, NotificationChannel, WebhookChannel, build_channel,
    classify_response,
};
pub use dispatcher::{DeliveryReport, Dispatcher, ReplayReport};
pub use feed::FeedParser;
pub use fetcher::{Fetcher, HttpFetcher};
