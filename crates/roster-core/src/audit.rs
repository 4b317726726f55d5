//! Audit findings: anomalies that must reach an operator instead of silently
//! overwriting data.

use serde::{Deserialize, Serialize};

use crate::demographic::NationalId;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AuditKind {
  /// More than one record carries the same national id.
  DuplicateNationalId,
  /// A stored and an incoming record share a national id but disagree on
  /// badge number or external id.
  IdentityConflict,
  /// An operator retired a duplicate and moved its profit details to the
  /// surviving record.
  ProfitDetailsMerge,
}

/// One row for the sync audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
  pub kind:        AuditKind,
  /// The offending key.
  pub national_id: NationalId,
  pub message:     String,
  /// The conflicting values, for operator review.
  pub payload:     serde_json::Value,
}
