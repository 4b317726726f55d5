//! Operator-driven resolution of a flagged duplicate.
//!
//! The source demographic is retired onto a placeholder national id and its
//! profit details move to the target. Everything runs through [`execute`]
//! inside one store transaction, with a `profit-details-merge` audit row.

use chrono::{DateTime, Utc};
use roster_core::{
  Error,
  audit::{AuditKind, AuditRecord},
  command::{DependentTable, MutationCommand},
  demographic::{DemographicId, NationalId},
  field::{DemographicField, FieldChange, FieldValue},
  history::{HistoryEntry, HistoryReason},
  store::StoreTransaction,
};
use serde::Serialize;
use serde_json::json;

use crate::executor::execute;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
  pub source:               DemographicId,
  pub target:               DemographicId,
  /// The national id the source now carries.
  pub placeholder:          NationalId,
  pub moved_profit_details: u64,
  pub moved_beneficiaries:  u64,
}

/// Retire `source` in favour of `target`.
///
/// When the two records carry different national ids, the source's profit
/// details are rewritten to the target's id and its beneficiary contacts
/// follow the source to its placeholder. When they share one, the dependent
/// rows already reference the target and stay put.
pub fn merge_profit_details<T>(
  tx: &mut T,
  source_id: DemographicId,
  target_id: DemographicId,
  now: DateTime<Utc>,
) -> Result<MergeReport, T::Error>
where
  T: StoreTransaction + ?Sized,
  T::Error: From<Error>,
{
  if source_id == target_id {
    return Err(Error::SelfMerge(source_id).into());
  }
  let source = tx
    .load_demographic(source_id)?
    .ok_or(Error::DemographicNotFound(source_id))?;
  let target = tx
    .load_demographic(target_id)?
    .ok_or(Error::DemographicNotFound(target_id))?;
  let placeholder = next_placeholder(tx)?;

  let (old, shared) = (source.national_id, source.national_id == target.national_id);
  let mut commands = vec![MutationCommand::UpdateWithHistory {
    demographic_id: source.id,
    changes:        vec![FieldChange {
      field:  DemographicField::NationalId,
      before: FieldValue::Number(Some(i64::from(old.0))),
      after:  FieldValue::Number(Some(i64::from(placeholder.0))),
    }],
    history:        HistoryEntry::new(HistoryReason::SsnChange, now, &source),
  }];
  let mut cascades = Vec::new();
  if !shared {
    cascades.push((DependentTable::ProfitDetails, target.national_id));
    cascades.push((DependentTable::BeneficiaryContacts, placeholder));
  }
  commands.extend(
    cascades
      .iter()
      .map(|&(table, new)| MutationCommand::CascadeNationalIdUpdate { old, new, table }),
  );
  commands.push(MutationCommand::AuditWrite(AuditRecord {
    kind:        AuditKind::ProfitDetailsMerge,
    national_id: target.national_id,
    message:     format!(
      "merged profit details from demographic {} into demographic {}",
      source.id, target.id
    ),
    payload:     json!({
      "source": {
        "demographic_id": source.id,
        "external_id":    source.external_id,
        "badge_number":   source.badge_number,
      },
      "target": {
        "demographic_id": target.id,
        "external_id":    target.external_id,
        "badge_number":   target.badge_number,
      },
      "shared_national_id": shared,
    }),
  }));

  // One command at a time so moved rows are counted per table.
  let mut report = MergeReport {
    source: source.id,
    target: target.id,
    placeholder,
    moved_profit_details: 0,
    moved_beneficiaries: 0,
  };
  for command in &commands {
    let moved = execute(tx, std::slice::from_ref(command), now)?.cascaded_rows;
    if let MutationCommand::CascadeNationalIdUpdate { table, .. } = command {
      match table {
        DependentTable::ProfitDetails => report.moved_profit_details += moved,
        DependentTable::BeneficiaryContacts => report.moved_beneficiaries += moved,
      }
    }
  }
  Ok(report)
}

/// Lowest placeholder national id nothing references yet.
fn next_placeholder<T>(tx: &mut T) -> Result<NationalId, T::Error>
where
  T: StoreTransaction + ?Sized,
  T::Error: From<Error>,
{
  for candidate in NationalId::PLACEHOLDER_START..=NationalId::MAX {
    let id = NationalId(candidate);
    if !tx.national_id_in_use(id)? {
      return Ok(id);
    }
  }
  Err(Error::PlaceholdersExhausted.into())
}
