//! Mutation commands: the unit of work handed from the planner to the
//! executor.
//!
//! Each variant is plain data. A whole cycle's command list can be logged or
//! serialised without touching the store.

use serde::{Deserialize, Serialize};

use crate::{
  audit::AuditRecord,
  demographic::{DemographicId, IncomingRecord, NationalId},
  field::FieldChange,
  history::{HistoryEntry, HistoryReason},
};

/// Tables outside the demographic that reference a person by national id.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::Display,
  strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DependentTable {
  BeneficiaryContacts,
  ProfitDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MutationCommand {
  /// Create a demographic and its baseline history entry.
  Insert {
    record:  IncomingRecord,
    history: HistoryEntry,
  },
  /// Apply field deltas to a stored demographic, snapshotting it first.
  UpdateWithHistory {
    demographic_id: DemographicId,
    changes:        Vec<FieldChange>,
    history:        HistoryEntry,
  },
  /// Rewrite every `table` row referencing `old` so it references `new`.
  CascadeNationalIdUpdate {
    old:   NationalId,
    new:   NationalId,
    table: DependentTable,
  },
  AuditWrite(AuditRecord),
}

impl MutationCommand {
  pub fn history_reason(&self) -> Option<HistoryReason> {
    match self {
      Self::Insert { history, .. } | Self::UpdateWithHistory { history, .. } => {
        Some(history.reason)
      }
      _ => None,
    }
  }
}
