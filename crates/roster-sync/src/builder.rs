//! Command builder: assembles one cycle's commands in commit order and checks
//! the invariants the executor relies on.

use std::collections::HashSet;

use roster_core::{
  Error, Result,
  command::MutationCommand,
  demographic::NationalId,
  field::{DemographicField, FieldValue},
  history::HistoryReason,
};

/// Commands grouped by commit stage. The stages flatten in the order
/// inserts, updates, cascades, audits.
#[derive(Debug, Default, Clone)]
pub struct CommandPlan {
  inserts:  Vec<MutationCommand>,
  updates:  Vec<MutationCommand>,
  cascades: Vec<MutationCommand>,
  audits:   Vec<MutationCommand>,
}

impl CommandPlan {
  pub fn new() -> Self { Self::default() }

  pub fn push(&mut self, command: MutationCommand) {
    let stage = match &command {
      MutationCommand::Insert { .. } => &mut self.inserts,
      MutationCommand::UpdateWithHistory { .. } => &mut self.updates,
      MutationCommand::CascadeNationalIdUpdate { .. } => &mut self.cascades,
      MutationCommand::AuditWrite(_) => &mut self.audits,
    };
    stage.push(command);
  }

  pub fn inserted(&self) -> usize { self.inserts.len() }

  pub fn updated(&self) -> usize { self.count_updates(HistoryReason::SyncUpdate) }

  pub fn national_id_changes(&self) -> usize { self.count_updates(HistoryReason::SsnChange) }

  pub fn cascades(&self) -> usize { self.cascades.len() }

  pub fn audited(&self) -> usize { self.audits.len() }

  /// No structural mutation is planned; at most audit writes remain.
  pub fn is_structurally_empty(&self) -> bool {
    self.inserts.is_empty() && self.updates.is_empty() && self.cascades.is_empty()
  }

  pub fn is_empty(&self) -> bool { self.is_structurally_empty() && self.audits.is_empty() }

  fn count_updates(&self, reason: HistoryReason) -> usize {
    self
      .updates
      .iter()
      .filter(|c| c.history_reason() == Some(reason))
      .count()
  }

  /// Check the plan and flatten it into commit order.
  pub fn into_commands(self) -> Result<Vec<MutationCommand>> {
    self.validate()?;
    let Self { inserts, updates, cascades, audits } = self;
    Ok(
      inserts
        .into_iter()
        .chain(updates)
        .chain(cascades)
        .chain(audits)
        .collect(),
    )
  }

  /// Invariants: inserts carry distinct external ids; every update changes
  /// something; every cascade follows an `ssn-change` update with the same
  /// old and new value.
  pub fn validate(&self) -> Result<()> {
    let mut external_ids = HashSet::new();
    for command in &self.inserts {
      if let MutationCommand::Insert { record, .. } = command
        && !external_ids.insert(record.external_id)
      {
        return Err(Error::InvalidCommandList(format!(
          "external id {} inserted twice",
          record.external_id
        )));
      }
    }

    let mut renames: HashSet<(NationalId, NationalId)> = HashSet::new();
    for command in &self.updates {
      let MutationCommand::UpdateWithHistory { demographic_id, changes, history } = command else {
        continue;
      };
      if changes.is_empty() {
        return Err(Error::InvalidCommandList(format!(
          "update of demographic {demographic_id} carries no changes"
        )));
      }
      if history.reason == HistoryReason::SsnChange {
        renames.extend(changes.iter().filter_map(national_id_rename));
      }
    }

    for command in &self.cascades {
      if let MutationCommand::CascadeNationalIdUpdate { old, new, table } = command
        && !renames.contains(&(*old, *new))
      {
        return Err(Error::InvalidCommandList(format!(
          "cascade of {table} from {old} to {new} has no matching ssn-change update"
        )));
      }
    }
    Ok(())
  }
}

impl Extend<MutationCommand> for CommandPlan {
  fn extend<I: IntoIterator<Item = MutationCommand>>(&mut self, iter: I) {
    for command in iter {
      self.push(command);
    }
  }
}

fn national_id_rename(change: &roster_core::field::FieldChange) -> Option<(NationalId, NationalId)> {
  if change.field != DemographicField::NationalId {
    return None;
  }
  let as_id = |v: &FieldValue| match v {
    FieldValue::Number(Some(n)) => u32::try_from(*n).ok().map(NationalId),
    _ => None,
  };
  Some((as_id(&change.before)?, as_id(&change.after)?))
}
