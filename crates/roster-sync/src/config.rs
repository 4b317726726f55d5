//! Runtime configuration, deserialised from `roster.toml` and `ROSTER__*`
//! environment variables by the binary.
//!
//! Every field has a default so an empty configuration is valid.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Tuning for a single reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Upper bound on parameters bound into one store lookup. Pair lookups
  /// bind two per pair and therefore send half as many pairs.
  pub query_chunk_size:     usize,
  /// How far back a `Delta` sync looks at source modification stamps.
  pub delta_window_hours:   i64,
  pub audit_retention_days: i64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      query_chunk_size:     500,
      delta_window_hours:   24,
      audit_retention_days: 30,
    }
  }
}

impl SyncConfig {
  pub fn id_chunk_size(&self) -> usize { self.query_chunk_size.max(1) }

  pub fn pair_chunk_size(&self) -> usize { (self.query_chunk_size / 2).max(1) }
}

/// When the scheduler runs cycles and how it retries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  pub run_on_startup:     bool,
  pub interval_hours:     u64,
  pub retry_attempts:     u32,
  pub retry_backoff_secs: u64,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      run_on_startup:     true,
      interval_hours:     24,
      retry_attempts:     3,
      retry_backoff_secs: 60,
    }
  }
}

impl ScheduleConfig {
  pub fn interval(&self) -> Duration { Duration::from_secs(self.interval_hours.max(1) * 3600) }

  pub fn retry_backoff(&self) -> Duration { Duration::from_secs(self.retry_backoff_secs) }
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path:  PathBuf,
  /// JSON array of incoming records, as exported by the HR system.
  pub source_path: PathBuf,
  pub sync:        SyncConfig,
  pub schedule:    ScheduleConfig,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path:  PathBuf::from("roster.db"),
      source_path: PathBuf::from("incoming.json"),
      sync:        SyncConfig::default(),
      schedule:    ScheduleConfig::default(),
    }
  }
}
