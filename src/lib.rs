// src/lib.rs

//! lendwatch: change detection and notification for lending-platform data.
//!
//! A cycle fetches every enabled domain, diffs it against the last
//! snapshot, notifies subscribers about new or changed records and
//! remembers what was sent so nothing goes out twice.

pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
