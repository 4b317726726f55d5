//! History tracker: field deltas, insert baselines and national-id cascades.
//!
//! Every command built here carries the snapshot that the executor writes to
//! the history table before the row changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use roster_core::{
  Result,
  command::{DependentTable, MutationCommand},
  demographic::{Demographic, ExternalId, IncomingRecord, NationalId},
  field::{DemographicField, FieldChange, FieldValue, field_delta},
  history::{HistoryEntry, HistoryReason},
};
use strum::IntoEnumIterator;

use crate::matching::pair;

// ─── Sync updates ────────────────────────────────────────────────────────────

/// One `UpdateWithHistory` per paired record whose fields differ. Pairs that
/// already agree produce nothing, so re-running an unchanged batch is a no-op.
pub fn prepare_update_with_history(
  existing: &[Demographic],
  incoming: &[IncomingRecord],
  now: DateTime<Utc>,
) -> (usize, Vec<MutationCommand>) {
  let commands: Vec<MutationCommand> = pair(existing, incoming)
    .into_iter()
    .filter_map(|p| {
      let changes = field_delta(p.stored, p.incoming);
      (!changes.is_empty()).then(|| MutationCommand::UpdateWithHistory {
        demographic_id: p.stored.id,
        changes,
        history: HistoryEntry::new(HistoryReason::SyncUpdate, now, p.stored),
      })
    })
    .collect();
  (commands.len(), commands)
}

// ─── Inserts ─────────────────────────────────────────────────────────────────

/// One `Insert` per new record, each with an `initial` baseline entry.
pub fn prepare_insert_with_history(
  new_records: &[IncomingRecord],
  now: DateTime<Utc>,
) -> (usize, Vec<MutationCommand>) {
  let commands: Vec<MutationCommand> = new_records
    .iter()
    .map(|record| MutationCommand::Insert {
      record:  record.clone(),
      history: HistoryEntry::new(HistoryReason::Initial, now, record),
    })
    .collect();
  (commands.len(), commands)
}

// ─── National-id changes ─────────────────────────────────────────────────────

/// A stored record matched by external id whose incoming national id
/// differs.
#[derive(Debug, Clone, Copy)]
pub struct NationalIdChange<'a> {
  pub stored:   &'a Demographic,
  pub incoming: &'a IncomingRecord,
}

impl NationalIdChange<'_> {
  pub fn old_id(&self) -> NationalId { self.stored.national_id }

  pub fn new_id(&self) -> NationalId { self.incoming.national_id }
}

/// Stored records whose national id changed. The join is by external id only,
/// since the national id is the very value under test.
pub fn detect_national_id_changes<'a>(
  existing: &'a [Demographic],
  incoming_by_external_id: &'a BTreeMap<ExternalId, IncomingRecord>,
) -> Vec<NationalIdChange<'a>> {
  existing
    .iter()
    .filter_map(|stored| {
      let incoming = incoming_by_external_id.get(&stored.external_id?)?;
      (incoming.national_id != stored.national_id).then_some(NationalIdChange { stored, incoming })
    })
    .collect()
}

/// For each change, an `ssn-change` update of the demographic followed by one
/// cascade per dependent table, all from the old value to the new one.
///
/// The update's snapshot is the record as it will stand after this cycle's
/// sync-update deltas, which the executor applies first.
pub fn prepare_national_id_cascade(
  changes: &[NationalIdChange<'_>],
  now: DateTime<Utc>,
) -> Result<Vec<MutationCommand>> {
  let mut commands = Vec::new();
  for change in changes {
    let mut updated = change.stored.clone();
    for delta in field_delta(change.stored, change.incoming) {
      updated.apply_change(&delta)?;
    }

    let (old, new) = (change.old_id(), change.new_id());
    commands.push(MutationCommand::UpdateWithHistory {
      demographic_id: change.stored.id,
      changes:        vec![FieldChange {
        field:  DemographicField::NationalId,
        before: FieldValue::Number(Some(i64::from(old.0))),
        after:  FieldValue::Number(Some(i64::from(new.0))),
      }],
      history:        HistoryEntry::new(HistoryReason::SsnChange, now, &updated),
    });
    commands.extend(
      DependentTable::iter().map(|table| MutationCommand::CascadeNationalIdUpdate { old, new, table }),
    );
  }
  Ok(commands)
}
