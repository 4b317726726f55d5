//! Reconciliation engine for workforce demographic records.
//!
//! A cycle reads an incoming batch from a [`RecordSource`], matches it
//! against a [`RecordStore`](roster_core::store::RecordStore), audits
//! duplicates and identity conflicts, plans field updates and national-id
//! cascades, and commits everything in a single store transaction.

pub mod audit;
pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod matching;
pub mod merge;
pub mod scheduler;
pub mod source;

pub use config::{ScheduleConfig, Settings, SyncConfig};
pub use engine::{CycleAborted, CyclePhase, CycleReport, CycleStatus, ReconciliationEngine};
pub use error::{Result, SyncError};
pub use scheduler::Scheduler;
pub use source::{JsonFileSource, RecordSource, SyncKind};

#[cfg(test)]
mod fake;
#[cfg(test)]
mod tests;
