//! Change-detection pipeline.
//!
//! - `diff`: added/changed records between two snapshots
//! - `schedule`: should-poll predicate, per-domain cadence and failure backoff
//! - `cycle`: one poll → diff → notify pass over the due domains
//! - `scheduler`: the long-lived loop driving cycles

pub mod cycle;
pub mod diff;
pub mod schedule;
pub mod scheduler;

pub use cycle::{CycleReport, DeferredReport, NotifyOutcome, RefreshStatus, WatchStats, Watcher};
pub use diff::{DiffCalculator, DiffResult, calculate_diff};
pub use schedule::{PollDecision, SchedulePolicy};
pub use scheduler::{Scheduler, SchedulerState};
