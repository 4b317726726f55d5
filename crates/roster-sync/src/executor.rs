//! Command executor: one exhaustive dispatch over [`MutationCommand`].
//!
//! Runs inside the store's transaction closure. The first error aborts the
//! loop and the store rolls the transaction back.

use chrono::{DateTime, Utc};
use roster_core::{
  Error,
  command::MutationCommand,
  history::HistoryReason,
  store::StoreTransaction,
};
use serde::Serialize;

/// What one committed command list did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
  pub inserted:            usize,
  pub updated:             usize,
  pub national_id_changes: usize,
  pub cascaded_rows:       u64,
  pub audited:             usize,
}

pub fn execute<T>(
  tx: &mut T,
  commands: &[MutationCommand],
  now: DateTime<Utc>,
) -> Result<ExecutionReport, T::Error>
where
  T: StoreTransaction + ?Sized,
  T::Error: From<Error>,
{
  let mut report = ExecutionReport::default();

  for command in commands {
    match command {
      MutationCommand::Insert { record, history } => {
        let id = tx.insert_demographic(record, now)?;
        tx.insert_history(id, history)?;
        report.inserted += 1;
      }

      MutationCommand::UpdateWithHistory { demographic_id, changes, history } => {
        let mut demographic = tx
          .load_demographic(*demographic_id)?
          .ok_or(Error::DemographicNotFound(*demographic_id))?;
        for change in changes {
          demographic.apply_change(change)?;
        }
        demographic.modified_at = now;

        tx.insert_history(*demographic_id, history)?;
        tx.save_demographic(&demographic)?;
        match history.reason {
          HistoryReason::SsnChange => report.national_id_changes += 1,
          _ => report.updated += 1,
        }
      }

      MutationCommand::CascadeNationalIdUpdate { old, new, table } => {
        report.cascaded_rows += tx.rewrite_national_id(*table, *old, *new)?;
      }

      MutationCommand::AuditWrite(record) => {
        tx.write_audit(record, now)?;
        report.audited += 1;
      }
    }
  }

  Ok(report)
}
