//! Duplicate and conflict auditor.
//!
//! Findings never block a cycle. Each one becomes an `AuditWrite` command
//! committed alongside the structural mutations.

use std::collections::{BTreeMap, HashMap};

use roster_core::{
  audit::{AuditKind, AuditRecord},
  command::MutationCommand,
  demographic::{Demographic, EmploymentStatus, IncomingRecord, NationalId, RecordView},
};
use serde_json::json;
use tracing::warn;

use crate::history::NationalIdChange;

// ─── Duplicates ──────────────────────────────────────────────────────────────

/// Records sharing one national id.
#[derive(Debug)]
pub struct DuplicateGroup<'a, R> {
  pub national_id: NationalId,
  pub records:     Vec<&'a R>,
}

/// Group `records` by national id and keep the groups with more than one
/// member, in ascending national-id order.
pub fn detect_duplicate_national_ids<R: RecordView>(records: &[R]) -> Vec<DuplicateGroup<'_, R>> {
  let mut groups: BTreeMap<NationalId, Vec<&R>> = BTreeMap::new();
  for record in records {
    groups.entry(record.national_id()).or_default().push(record);
  }
  groups
    .into_iter()
    .filter(|(_, members)| members.len() > 1)
    .map(|(national_id, records)| DuplicateGroup { national_id, records })
    .collect()
}

/// One `duplicate-national-id` audit per group. `origin` names where the
/// records came from (`stored` or `incoming`).
pub fn prepare_audit_duplicates<R: RecordView>(
  groups: &[DuplicateGroup<'_, R>],
  origin: &str,
) -> Vec<MutationCommand> {
  groups
    .iter()
    .map(|group| {
      warn!(
        national_id = %group.national_id,
        count = group.records.len(),
        origin,
        "duplicate national id"
      );
      let members: Vec<_> = group
        .records
        .iter()
        .map(|r| json!({ "external_id": r.external_id(), "badge_number": r.badge_number() }))
        .collect();
      MutationCommand::AuditWrite(AuditRecord {
        kind:        AuditKind::DuplicateNationalId,
        national_id: group.national_id,
        message:     format!("{} {origin} records share one national id", group.records.len()),
        payload:     json!({ "origin": origin, "records": members }),
      })
    })
    .collect()
}

// ─── Identity conflicts ──────────────────────────────────────────────────────

/// One `identity-conflict` audit for every stored/incoming pair that shares a
/// national id but disagrees on badge, or on external id when both are
/// known. A terminated stored record still conflicts; its status is carried
/// in the message and payload so a reissued national id can be told apart.
pub fn prepare_conflict_checks(
  existing: &[Demographic],
  incoming: &[IncomingRecord],
) -> Vec<MutationCommand> {
  let mut by_national_id: HashMap<NationalId, Vec<&IncomingRecord>> = HashMap::new();
  for record in incoming {
    by_national_id.entry(record.national_id).or_default().push(record);
  }

  let mut commands = Vec::new();
  for stored in existing {
    let Some(candidates) = by_national_id.get(&stored.national_id) else {
      continue;
    };
    for record in candidates {
      let mut differs = Vec::new();
      if stored.badge_number != record.badge_number {
        differs.push("badge_number");
      }
      if stored.external_id.is_some_and(|id| id != record.external_id) {
        differs.push("external_id");
      }
      if differs.is_empty() {
        continue;
      }
      let terminated = stored.profile.employment.status == EmploymentStatus::Terminated;

      warn!(
        national_id = %stored.national_id,
        demographic_id = %stored.id,
        fields = ?differs,
        terminated,
        "identity conflict"
      );
      let mut message = format!("stored and incoming records disagree on {}", differs.join(", "));
      if terminated {
        message.push_str("; the stored record is terminated");
      }
      commands.push(MutationCommand::AuditWrite(AuditRecord {
        kind:        AuditKind::IdentityConflict,
        national_id: stored.national_id,
        message,
        payload:     json!({
          "differs": differs,
          "stored": {
            "demographic_id": stored.id,
            "external_id":    stored.external_id,
            "badge_number":   stored.badge_number,
            "status":         stored.profile.employment.status,
          },
          "incoming": {
            "external_id":  record.external_id,
            "badge_number": record.badge_number,
          },
        }),
      }));
    }
  }
  commands
}

// ─── Cascade targets ─────────────────────────────────────────────────────────

/// Split national-id changes into those safe to cascade and audits for the
/// rest.
///
/// A change is withheld when its new value is also the target of another
/// change in the cycle, or is currently held by a different stored record.
/// Cascading either would merge two people's dependent rows.
pub fn check_cascade_targets<'a>(
  changes: Vec<NationalIdChange<'a>>,
  stored: &[Demographic],
) -> (Vec<NationalIdChange<'a>>, Vec<MutationCommand>) {
  let mut targets: HashMap<NationalId, usize> = HashMap::new();
  for change in &changes {
    *targets.entry(change.new_id()).or_default() += 1;
  }

  let mut allowed = Vec::new();
  let mut audits = Vec::new();
  for change in changes {
    let new = change.new_id();
    let contested = targets.get(&new).copied().unwrap_or(0) > 1;
    let holder = stored
      .iter()
      .find(|d| d.id != change.stored.id && d.national_id == new);

    if !contested && holder.is_none() {
      allowed.push(change);
      continue;
    }
    warn!(
      demographic_id = %change.stored.id,
      old = %change.old_id(),
      new = %new,
      "national id change withheld from cascade"
    );
    let reason = if contested {
      "target of more than one change in this cycle"
    } else {
      "already held by another record"
    };
    audits.push(MutationCommand::AuditWrite(AuditRecord {
      kind:        AuditKind::IdentityConflict,
      national_id: new,
      message:     format!("national id change withheld: new value {reason}"),
      payload:     json!({
        "demographic_id":        change.stored.id,
        "external_id":           change.incoming.external_id,
        "old_national_id":       change.old_id(),
        "new_national_id":       new,
        "holder_demographic_id": holder.map(|d| d.id),
      }),
    }));
  }
  (allowed, audits)
}
