//! Error type for `roster-sync`.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SyncError {
  /// The cancellation signal fired before the cycle reached `Committing`.
  #[error("sync cycle cancelled before commit")]
  Cancelled,

  /// Malformed input or a broken command-list invariant. Not retried.
  #[error("fatal: {0}")]
  Fatal(#[from] roster_core::Error),

  #[error("source error: {0}")]
  Source(#[source] BoxError),

  /// The source delivered records that cannot be decoded. Not retried.
  #[error("malformed source data: {0}")]
  Malformed(#[source] BoxError),

  /// Read or commit failure in the record store. Nothing was persisted.
  #[error("store error: {0}")]
  Store(#[source] BoxError),
}

impl SyncError {
  pub fn source_error(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Source(Box::new(e))
  }

  pub fn malformed(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Malformed(Box::new(e))
  }

  pub fn store_error(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  /// Whether the scheduler may run the cycle again from `Fetching`.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::Source(_) | Self::Store(_)) }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
