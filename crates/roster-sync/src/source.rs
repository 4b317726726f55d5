//! Incoming-record sources.

use std::{future::Future, path::PathBuf, sync::Arc};

use chrono::{Duration, Utc};
use roster_core::demographic::IncomingRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// How much of the source a cycle compares against.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncKind {
  /// Every record the source holds.
  Full,
  /// Records modified within the configured window.
  Delta,
}

/// Supplies one cycle's batch. The engine does not page the source.
pub trait RecordSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn fetch(
    &self,
    kind: SyncKind,
  ) -> impl Future<Output = Result<Vec<IncomingRecord>, Self::Error>> + Send + '_;

  /// Whether fetching again could succeed. Errors for which this is false,
  /// such as a record that cannot be decoded, abort the cycle as fatal.
  fn is_transient(error: &Self::Error) -> bool {
    let _ = error;
    true
  }
}

impl<T: RecordSource> RecordSource for Arc<T> {
  type Error = T::Error;

  fn fetch(
    &self,
    kind: SyncKind,
  ) -> impl Future<Output = Result<Vec<IncomingRecord>, Self::Error>> + Send + '_ {
    T::fetch(self, kind)
  }

  fn is_transient(error: &Self::Error) -> bool { T::is_transient(error) }
}

// ─── JSON file ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("failed to read {path}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed record file: {0}")]
  Json(#[from] serde_json::Error),
}

/// Reads a JSON array of [`IncomingRecord`]s exported by the HR system.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
  path:         PathBuf,
  delta_window: Duration,
}

impl JsonFileSource {
  pub fn new(path: impl Into<PathBuf>, delta_window_hours: i64) -> Self {
    Self {
      path:         path.into(),
      delta_window: Duration::hours(delta_window_hours),
    }
  }
}

impl RecordSource for JsonFileSource {
  type Error = SourceError;

  /// An unreadable file may be mid-export; a file that does not decode will
  /// not improve on its own.
  fn is_transient(error: &SourceError) -> bool { matches!(error, SourceError::Io { .. }) }

  async fn fetch(&self, kind: SyncKind) -> Result<Vec<IncomingRecord>, SourceError> {
    let bytes = tokio::fs::read(&self.path)
      .await
      .map_err(|source| SourceError::Io { path: self.path.clone(), source })?;
    let records: Vec<IncomingRecord> = serde_json::from_slice(&bytes)?;
    let total = records.len();

    let records = match kind {
      SyncKind::Full => records,
      SyncKind::Delta => {
        let since = Utc::now() - self.delta_window;
        records
          .into_iter()
          .filter(|r| r.source_updated_at.is_none_or(|at| at >= since))
          .collect()
      }
    };
    debug!(path = %self.path.display(), total, kept = records.len(), %kind, "read source file");
    Ok(records)
  }
}
