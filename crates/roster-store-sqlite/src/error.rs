//! Error type for `roster-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] roster_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value the domain types cannot represent.
  #[error("corrupt column {column}: {value}")]
  Decode { column: &'static str, value: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
