//! The reconciliation cycle: `Fetching → Matching → Auditing → Diffing →
//! Committing → {Completed | Aborted}`.
//!
//! Only `Committing` writes, and it writes everything in one transaction.
//! Cancellation is observed at every phase boundary up to and including the
//! entry into `Committing`; once the transaction is handed to the store it
//! runs to commit or rollback.

use chrono::{DateTime, Duration, Utc};
use roster_core::{batch::IncomingBatch, demographic::DemographicId, store::RecordStore};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
  SyncError,
  audit::{
    check_cascade_targets, detect_duplicate_national_ids, prepare_audit_duplicates,
    prepare_conflict_checks,
  },
  builder::CommandPlan,
  config::SyncConfig,
  executor::{ExecutionReport, execute},
  history::{
    detect_national_id_changes, prepare_insert_with_history, prepare_national_id_cascade,
    prepare_update_with_history,
  },
  matching::{self, identify_new},
  merge::{MergeReport, merge_profit_details},
  source::{RecordSource, SyncKind},
};

// ─── Cycle state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CyclePhase {
  Fetching,
  Matching,
  Auditing,
  Diffing,
  Committing,
  Completed,
  Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CycleStatus {
  Completed,
  Aborted,
}

/// Per-cycle outcome. Mutation counts are non-zero only for a committed
/// cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
  pub cycle_id:               Uuid,
  pub kind:                   SyncKind,
  pub status:                 CycleStatus,
  pub started_at:             DateTime<Utc>,
  pub finished_at:            DateTime<Utc>,
  pub requested:              usize,
  pub primary_matched:        usize,
  pub fallback_matched:       usize,
  pub skipped_all_zero_badge: bool,
  pub inserted:               usize,
  pub updated:                usize,
  pub national_id_changes:    usize,
  pub cascaded_rows:          u64,
  pub audited:                usize,
}

impl CycleReport {
  fn begin(kind: SyncKind) -> Self {
    let now = Utc::now();
    Self {
      cycle_id: Uuid::new_v4(),
      kind,
      status: CycleStatus::Aborted,
      started_at: now,
      finished_at: now,
      requested: 0,
      primary_matched: 0,
      fallback_matched: 0,
      skipped_all_zero_badge: false,
      inserted: 0,
      updated: 0,
      national_id_changes: 0,
      cascaded_rows: 0,
      audited: 0,
    }
  }

  fn committed(&mut self, exec: &ExecutionReport) {
    self.inserted = exec.inserted;
    self.updated = exec.updated;
    self.national_id_changes = exec.national_id_changes;
    self.cascaded_rows = exec.cascaded_rows;
    self.audited = exec.audited;
  }
}

/// A cycle that ended in `Aborted`. No store mutation persisted.
#[derive(Debug, Error)]
#[error("sync cycle {} aborted in {phase}: {error}", .report.cycle_id)]
pub struct CycleAborted {
  pub report: CycleReport,
  pub phase:  CyclePhase,
  #[source]
  pub error:  SyncError,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Runs reconciliation cycles of `R`'s records into `S`.
///
/// Cycles through one engine are serialised: a second caller waits for the
/// running cycle to finish before it starts fetching.
pub struct ReconciliationEngine<S, R> {
  store:     S,
  source:    R,
  config:    SyncConfig,
  in_flight: Mutex<()>,
}

impl<S, R> ReconciliationEngine<S, R>
where
  S: RecordStore,
  R: RecordSource,
{
  pub fn new(store: S, source: R, config: SyncConfig) -> Self {
    Self { store, source, config, in_flight: Mutex::new(()) }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &SyncConfig { &self.config }

  /// Retire the `source` duplicate in favour of `target` in one transaction.
  /// Waits for any running cycle first.
  pub async fn merge(
    &self,
    source: DemographicId,
    target: DemographicId,
  ) -> Result<MergeReport, SyncError> {
    let _guard = self.in_flight.lock().await;
    let now = Utc::now();
    let report = self
      .store
      .with_transaction(move |tx| merge_profit_details(tx, source, target, now))
      .await
      .map_err(SyncError::store_error)?;
    info!(
      source = %report.source,
      target = %report.target,
      moved_profit_details = report.moved_profit_details,
      moved_beneficiaries = report.moved_beneficiaries,
      "merged duplicate demographic"
    );
    Ok(report)
  }

  /// Run one full cycle.
  pub async fn run_cycle(
    &self,
    kind: SyncKind,
    cancel: &CancellationToken,
  ) -> Result<CycleReport, CycleAborted> {
    let _guard = self.in_flight.lock().await;
    let mut report = CycleReport::begin(kind);
    let span = info_span!("sync_cycle", cycle_id = %report.cycle_id, %kind);

    async move {
      let mut phase = CyclePhase::Fetching;
      let outcome = self.drive(cancel, &mut report, &mut phase).await;
      report.finished_at = Utc::now();

      match outcome {
        Ok(exec) => {
          phase = CyclePhase::Completed;
          report.status = CycleStatus::Completed;
          report.committed(&exec);
          info!(
            %phase,
            requested = report.requested,
            inserted = report.inserted,
            updated = report.updated,
            national_id_changes = report.national_id_changes,
            cascaded_rows = report.cascaded_rows,
            audited = report.audited,
            "sync cycle completed"
          );
          Ok(report)
        }
        Err(error) => {
          match &error {
            SyncError::Cancelled => warn!(%phase, "sync cycle cancelled"),
            _ => error!(
              %phase,
              %error,
              retryable = error.is_retryable(),
              "sync cycle {}",
              CyclePhase::Aborted
            ),
          }
          Err(CycleAborted { report, phase, error })
        }
      }
    }
    .instrument(span)
    .await
  }

  async fn drive(
    &self,
    cancel: &CancellationToken,
    report: &mut CycleReport,
    phase: &mut CyclePhase,
  ) -> Result<ExecutionReport, SyncError> {
    // Fetching
    enter(phase, CyclePhase::Fetching, cancel)?;
    let records = self
      .source
      .fetch(report.kind)
      .await
      .map_err(|e| {
        if R::is_transient(&e) {
          SyncError::source_error(e)
        } else {
          SyncError::malformed(e)
        }
      })?;
    let batch = IncomingBatch::new(records)?;
    report.requested = batch.len();
    info!(requested = batch.len(), "fetched incoming batch");

    // Matching
    enter(phase, CyclePhase::Matching, cancel)?;
    let matched = matching::resolve(&self.store, &batch, &self.config)
      .await
      .map_err(SyncError::store_error)?;
    report.primary_matched = matched.primary_matched;
    report.fallback_matched = matched.fallback_matched;
    report.skipped_all_zero_badge = matched.skipped_all_zero_badge;
    info!(
      primary = matched.primary_matched,
      fallback = matched.fallback_matched,
      peers = matched.peers.len(),
      skipped_all_zero_badge = matched.skipped_all_zero_badge,
      "matched incoming records"
    );

    let now = Utc::now();
    let mut stored = matched.existing.clone();
    stored.extend(matched.peers.iter().cloned());
    stored.sort_by_key(|d| d.id);

    // Auditing
    enter(phase, CyclePhase::Auditing, cancel)?;
    let mut plan = CommandPlan::new();
    plan.extend(prepare_audit_duplicates(&detect_duplicate_national_ids(&stored), "stored"));
    plan.extend(prepare_audit_duplicates(
      &detect_duplicate_national_ids(batch.records()),
      "incoming",
    ));
    plan.extend(prepare_conflict_checks(&stored, batch.records()));
    info!(findings = plan.audited(), "audited batch");

    // Diffing
    enter(phase, CyclePhase::Diffing, cancel)?;
    let new_records = identify_new(batch.records(), &matched.existing);
    let (inserted, inserts) = prepare_insert_with_history(&new_records, now);
    plan.extend(inserts);

    let (updated, updates) = prepare_update_with_history(&matched.existing, batch.records(), now);
    plan.extend(updates);

    let changes = detect_national_id_changes(&matched.existing, batch.by_external_id());
    let (changes, withheld) = check_cascade_targets(changes, &stored);
    plan.extend(withheld);
    plan.extend(prepare_national_id_cascade(&changes, now)?);
    info!(
      inserts = inserted,
      updates = updated,
      national_id_changes = plan.national_id_changes(),
      cascades = plan.cascades(),
      "planned mutations"
    );

    // Committing
    enter(phase, CyclePhase::Committing, cancel)?;
    let commands = plan.into_commands()?;
    if commands.is_empty() {
      debug!("nothing to commit");
      return Ok(ExecutionReport::default());
    }
    let exec = self
      .store
      .with_transaction(move |tx| execute(tx, &commands, now))
      .await
      .map_err(SyncError::store_error)?;
    Ok(exec)
  }
}

/// Move to `next`. A cancelled cycle aborts at the phase it was entering.
fn enter(
  phase: &mut CyclePhase,
  next: CyclePhase,
  cancel: &CancellationToken,
) -> Result<(), SyncError> {
  *phase = next;
  if cancel.is_cancelled() {
    return Err(SyncError::Cancelled);
  }
  debug!(phase = %next, "entering phase");
  Ok(())
}

/// Audit rows older than this are eligible for purging.
pub fn audit_cutoff(config: &SyncConfig, now: DateTime<Utc>) -> DateTime<Utc> {
  now - Duration::days(config.audit_retention_days)
}
