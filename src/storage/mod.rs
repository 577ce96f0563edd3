//! Durable state of the watcher.
//!
//! Every store sits on top of [`LocalStorage`], which writes JSON documents
//! atomically and keeps a `.bak` sibling for recovery:
//! - [`SnapshotStore`]: latest record set per domain, with its age
//! - [`SentRegistry`]: ids of records already delivered
//! - [`RecipientStore`]: recipients and their preferences
//! - [`FailedQueue`] / [`PendingQueue`]: deferred delivery work

pub mod local;
pub mod queue;
pub mod recipients;
pub mod registry;
pub mod snapshot;

// Re-export for convenience
pub use local::{LocalStorage, Loaded};
pub use queue::{FailedQueue, PendingQueue, QueueStore};
pub use recipients::RecipientStore;
pub use registry::{SentEntry, SentRegistry};
pub use snapshot::{Snapshot, SnapshotStore};
