//! Diff calculation between successive snapshots.
//!
//! Records are matched by composite key. A record whose key is new is
//! "added"; a record whose key exists but whose significant fields differ
//! is "changed". Records that disappeared are not reported: they stay in
//! the snapshot through [`carry_forward`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::{Record, Tracked};

/// Why a record appears in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Changed,
}

/// One notifiable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub record: Record,
}

/// Added and changed records, in the new snapshot's order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub changes: Vec<Change>,
}

impl DiffResult {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn added_count(&self) -> usize {
        self.count(ChangeKind::Added)
    }

    pub fn changed_count(&self) -> usize {
        self.count(ChangeKind::Changed)
    }

    fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.changes.iter().map(|c| &c.record)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.changes.into_iter().map(|c| c.record).collect()
    }
}

/// Calculator for computing diffs between snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffCalculator;

impl DiffCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Calculate the diff between previous and current snapshots.
    pub fn calculate(&self, previous: &[Record], current: &[Record]) -> DiffResult {
        let prev_map: HashMap<Vec<String>, Vec<String>> = previous
            .iter()
            .map(|r| (r.composite_key(), r.significant_fields()))
            .collect();

        let changes = current
            .iter()
            .filter_map(|record| {
                let kind = match prev_map.get(&record.composite_key()) {
                    None => ChangeKind::Added,
                    Some(prev_fields) if *prev_fields != record.significant_fields() => {
                        ChangeKind::Changed
                    }
                    Some(_) => return None,
                };
                Some(Change {
                    kind,
                    record: record.clone(),
                })
            })
            .collect();

        DiffResult { changes }
    }
}

/// Convenience function to calculate diff.
pub fn calculate_diff(previous: &[Record], current: &[Record]) -> DiffResult {
    DiffCalculator::new().calculate(previous, current)
}

/// Keep only the first record for each composite key.
///
/// Returns the surviving records and the number dropped.
pub fn dedupe_by_key(records: Vec<Record>) -> (Vec<Record>, usize) {
    let before = records.len();
    let mut seen = HashSet::with_capacity(before);
    let kept: Vec<Record> = records
        .into_iter()
        .filter(|r| seen.insert(r.composite_key()))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Append previous records whose keys are absent from `current`.
pub fn carry_forward(mut current: Vec<Record>, previous: &[Record]) -> Vec<Record> {
    let present: HashSet<Vec<String>> = current.iter().map(|r| r.composite_key()).collect();
    current.extend(
        previous
            .iter()
            .filter(|r| !present.contains(&r.composite_key()))
            .cloned(),
    );
    current
}
