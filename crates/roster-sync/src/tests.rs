//! End-to-end cycles against the SQLite store, plus scheduler behaviour.

use std::sync::Arc;

use roster_core::{
  audit::AuditKind,
  command::DependentTable,
  demographic::{
    BadgeNumber, DemographicId, EmploymentStatus, ExternalId, IncomingRecord, NationalId,
  },
  history::HistoryReason,
  store::RecordStore,
};
use roster_store_sqlite::SqliteStore;
use tokio_util::sync::CancellationToken;

use crate::{
  CyclePhase, CycleStatus, JsonFileSource, ReconciliationEngine, ScheduleConfig, Scheduler,
  SyncConfig, SyncError, SyncKind,
  fake::{MemorySource, RecordingStore, incoming},
};

type SqliteEngine = ReconciliationEngine<SqliteStore, Arc<MemorySource>>;

async fn engine(records: Vec<IncomingRecord>) -> (SqliteEngine, Arc<MemorySource>) {
  let store = SqliteStore::open_in_memory().await.expect("in-memory store");
  let source = Arc::new(MemorySource::new(records));
  (ReconciliationEngine::new(store, source.clone(), SyncConfig::default()), source)
}

async fn full_sync(engine: &SqliteEngine) -> crate::CycleReport {
  engine
    .run_cycle(SyncKind::Full, &CancellationToken::new())
    .await
    .expect("cycle completes")
}

/// Drop the external id of a stored row, as for records that predate the
/// HR feed.
async fn detach_external_id(store: &SqliteStore, id: DemographicId) {
  store
    .with_transaction(move |tx| {
      let mut d = tx.load_demographic(id)?.expect("seeded row");
      d.external_id = None;
      tx.save_demographic(&d)
    })
    .await
    .unwrap();
}

fn renamed(mut record: IncomingRecord, last_name: &str) -> IncomingRecord {
  record.profile.contact.last_name = last_name.into();
  record
}

// ─── Cycles ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_sync_inserts_with_initial_history() {
  let (engine, _) =
    engine(vec![incoming(100_001, 111_223_333, 5001), incoming(100_002, 222_334_444, 0)]).await;

  let report = full_sync(&engine).await;
  assert_eq!(report.status, CycleStatus::Completed);
  assert_eq!(report.requested, 2);
  assert_eq!(report.inserted, 2);
  assert_eq!(report.updated, 0);

  let stored = engine.store().all_demographics().await.unwrap();
  assert_eq!(stored.len(), 2);
  for d in &stored {
    let history = engine.store().history_for(d.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, HistoryReason::Initial);
  }
}

#[tokio::test]
async fn rerunning_an_unchanged_batch_is_a_no_op() {
  let (engine, _) =
    engine(vec![incoming(100_001, 111_223_333, 5001), incoming(100_002, 222_334_444, 5002)]).await;
  full_sync(&engine).await;
  let before = engine.store().all_demographics().await.unwrap();

  let report = full_sync(&engine).await;
  assert_eq!(report.primary_matched, 2);
  assert_eq!(report.inserted, 0);
  assert_eq!(report.updated, 0);
  assert_eq!(report.national_id_changes, 0);
  assert_eq!(report.cascaded_rows, 0);

  let after = engine.store().all_demographics().await.unwrap();
  assert_eq!(before, after);
  for d in &after {
    assert_eq!(engine.store().history_for(d.id).await.unwrap().len(), 1);
  }
}

#[tokio::test]
async fn changed_field_writes_one_history_entry() {
  let (engine, source) = engine(vec![incoming(100_001, 111_223_333, 5001)]).await;
  full_sync(&engine).await;

  source.replace(vec![renamed(incoming(100_001, 111_223_333, 5001), "Smithe")]);
  let report = full_sync(&engine).await;
  assert_eq!(report.updated, 1);

  let stored = engine.store().all_demographics().await.unwrap();
  assert_eq!(stored[0].profile.contact.last_name, "Smithe");

  let history = engine.store().history_for(stored[0].id).await.unwrap();
  let reasons: Vec<_> = history.iter().map(|h| h.reason).collect();
  assert_eq!(reasons, vec![HistoryReason::Initial, HistoryReason::SyncUpdate]);
  assert_eq!(history[1].snapshot.profile.contact.last_name, "Smith");

  // Same values again: nothing more is written.
  let report = full_sync(&engine).await;
  assert_eq!(report.updated, 0);
  assert_eq!(engine.store().history_for(stored[0].id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn national_id_change_cascades_to_every_dependent_table() {
  let (old, new) = (NationalId(111_223_333), NationalId(999_887_777));
  let (engine, source) = engine(vec![incoming(100_001, old.0, 5001)]).await;
  full_sync(&engine).await;

  let store = engine.store();
  store.add_dependent(DependentTable::BeneficiaryContacts, old).await.unwrap();
  store.add_dependent(DependentTable::ProfitDetails, old).await.unwrap();
  store.add_dependent(DependentTable::ProfitDetails, old).await.unwrap();

  source.replace(vec![incoming(100_001, new.0, 5001)]);
  let report = full_sync(&engine).await;
  assert_eq!(report.national_id_changes, 1);
  assert_eq!(report.cascaded_rows, 3);

  for table in [DependentTable::BeneficiaryContacts, DependentTable::ProfitDetails] {
    assert_eq!(store.count_dependents(table, old).await.unwrap(), 0);
  }
  assert_eq!(store.count_dependents(DependentTable::BeneficiaryContacts, new).await.unwrap(), 1);
  assert_eq!(store.count_dependents(DependentTable::ProfitDetails, new).await.unwrap(), 2);

  let stored = store.all_demographics().await.unwrap();
  assert_eq!(stored[0].national_id, new);
  let history = store.history_for(stored[0].id).await.unwrap();
  assert_eq!(history.last().unwrap().reason, HistoryReason::SsnChange);
  assert_eq!(history.last().unwrap().snapshot.national_id, old);
}

#[tokio::test]
async fn swapped_national_ids_are_withheld() {
  let (a, b) = (111_223_333, 222_334_444);
  let (engine, source) = engine(vec![incoming(100_001, a, 5001), incoming(100_002, b, 5002)]).await;
  full_sync(&engine).await;

  source.replace(vec![incoming(100_001, b, 5001), incoming(100_002, a, 5002)]);
  let report = full_sync(&engine).await;
  assert_eq!(report.national_id_changes, 0);
  assert_eq!(report.cascaded_rows, 0);
  assert!(report.audited > 0);

  let nids: Vec<_> = engine
    .store()
    .all_demographics()
    .await
    .unwrap()
    .iter()
    .map(|d| d.national_id.0)
    .collect();
  assert_eq!(nids, vec![a, b]);
  let audits = engine.store().audit_records().await.unwrap();
  assert!(audits.iter().any(|r| r.kind == AuditKind::IdentityConflict));
}

#[tokio::test]
async fn external_id_takes_precedence_over_pair() {
  let (engine, source) =
    engine(vec![incoming(100_001, 111_223_333, 5001), incoming(100_002, 222_334_444, 5002)]).await;
  full_sync(&engine).await;
  detach_external_id(engine.store(), DemographicId(2)).await;

  // Carries the pair of row 2 but the external id of row 1.
  source.replace(vec![incoming(100_001, 222_334_444, 5002)]);
  let report = full_sync(&engine).await;
  assert_eq!(report.primary_matched, 1);
  assert_eq!(report.fallback_matched, 0);
  assert_eq!(report.inserted, 0);

  let stored = engine.store().all_demographics().await.unwrap();
  assert_eq!(stored[0].external_id, Some(ExternalId(100_001)));
  assert_eq!(stored[0].badge_number, BadgeNumber(5002));
  // Row 2 already holds the new national id, so row 1 keeps its own.
  assert_eq!(stored[0].national_id, NationalId(111_223_333));
  assert_eq!(stored[1].external_id, None);
}

#[tokio::test]
async fn fallback_pair_adopts_external_id() {
  let (engine, source) = engine(vec![incoming(100_002, 222_334_444, 5002)]).await;
  full_sync(&engine).await;
  detach_external_id(engine.store(), DemographicId(1)).await;

  source.replace(vec![incoming(100_009, 222_334_444, 5002)]);
  let report = full_sync(&engine).await;
  assert_eq!(report.primary_matched, 0);
  assert_eq!(report.fallback_matched, 1);
  assert_eq!(report.updated, 1);
  assert_eq!(report.inserted, 0);

  let stored = engine.store().all_demographics().await.unwrap();
  assert_eq!(stored.len(), 1);
  assert_eq!(stored[0].external_id, Some(ExternalId(100_009)));
}

#[tokio::test]
async fn zero_badge_never_matches_by_pair() {
  let (engine, source) = engine(vec![incoming(100_001, 111_223_333, 0)]).await;
  full_sync(&engine).await;
  detach_external_id(engine.store(), DemographicId(1)).await;

  source.replace(vec![incoming(100_005, 111_223_333, 0)]);
  let report = full_sync(&engine).await;
  assert!(report.skipped_all_zero_badge);
  assert_eq!(report.fallback_matched, 0);
  assert_eq!(report.inserted, 1);

  let stored = engine.store().all_demographics().await.unwrap();
  assert_eq!(stored.len(), 2);
  assert_eq!(stored[0].external_id, None);
}

#[tokio::test]
async fn duplicate_incoming_national_ids_are_audited() {
  let (engine, _) =
    engine(vec![incoming(100_001, 333_445_555, 5001), incoming(100_002, 333_445_555, 5002)]).await;

  let report = full_sync(&engine).await;
  assert_eq!(report.inserted, 2);

  let audits = engine.store().audit_records().await.unwrap();
  let duplicates: Vec<_> =
    audits.iter().filter(|r| r.kind == AuditKind::DuplicateNationalId).collect();
  assert_eq!(duplicates.len(), 1);
  assert_eq!(duplicates[0].national_id, NationalId(333_445_555));
  assert_eq!(duplicates[0].payload["origin"], "incoming");
}

#[tokio::test]
async fn new_hire_on_terminated_national_id_is_audited() {
  let mut leaver = incoming(100_001, 111_223_333, 5001);
  leaver.profile.employment.status = EmploymentStatus::Terminated;
  let (engine, source) = engine(vec![leaver]).await;
  full_sync(&engine).await;

  source.replace(vec![incoming(200_002, 111_223_333, 7007)]);
  let report = engine
    .run_cycle(SyncKind::Delta, &CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(report.inserted, 1);
  assert_eq!(report.audited, 1);

  let audits = engine.store().audit_records().await.unwrap();
  assert_eq!(audits.len(), 1);
  assert_eq!(audits[0].kind, AuditKind::IdentityConflict);
  assert_eq!(audits[0].national_id, NationalId(111_223_333));
  assert_eq!(audits[0].payload["stored"]["status"], "terminated");
}

// ─── Merge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_retires_duplicate_and_moves_profit_details() {
  let (engine, _) =
    engine(vec![incoming(100_001, 111_223_333, 5001), incoming(100_002, 222_334_444, 5002)]).await;
  full_sync(&engine).await;
  let store = engine.store();
  store.add_dependent(DependentTable::ProfitDetails, NationalId(222_334_444)).await.unwrap();

  let report = engine.merge(DemographicId(2), DemographicId(1)).await.unwrap();
  assert_eq!(report.moved_profit_details, 1);
  assert!(report.placeholder.is_placeholder());

  assert_eq!(
    store.count_dependents(DependentTable::ProfitDetails, NationalId(111_223_333)).await.unwrap(),
    1
  );
  let stored = store.all_demographics().await.unwrap();
  assert_eq!(stored[1].national_id, report.placeholder);
  let history = store.history_for(DemographicId(2)).await.unwrap();
  assert_eq!(history.last().unwrap().reason, HistoryReason::SsnChange);
  assert_eq!(history.last().unwrap().snapshot.national_id, NationalId(222_334_444));

  let audits = store.audit_records().await.unwrap();
  assert_eq!(audits.last().unwrap().kind, AuditKind::ProfitDetailsMerge);
}

// ─── Aborts ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_cycle_leaves_store_untouched() {
  let (engine, source) = engine(vec![incoming(100_001, 111_223_333, 5001)]).await;
  let cancel = CancellationToken::new();
  cancel.cancel();

  let aborted = engine.run_cycle(SyncKind::Full, &cancel).await.unwrap_err();
  assert!(matches!(aborted.error, SyncError::Cancelled));
  assert_eq!(aborted.phase, CyclePhase::Fetching);
  assert_eq!(aborted.report.status, CycleStatus::Aborted);
  assert_eq!(aborted.report.inserted, 0);
  assert_eq!(source.fetches(), 0);
  assert!(engine.store().all_demographics().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_during_fetch_aborts_at_matching() {
  let cancel = CancellationToken::new();
  let source =
    MemorySource::new(vec![incoming(100_001, 111_223_333, 5001)]).cancelling(cancel.clone());
  let engine = ReconciliationEngine::new(RecordingStore::new(vec![]), source, SyncConfig::default());

  let aborted = engine.run_cycle(SyncKind::Full, &cancel).await.unwrap_err();
  assert!(matches!(aborted.error, SyncError::Cancelled));
  assert_eq!(aborted.phase, CyclePhase::Matching);
  assert_eq!(aborted.report.requested, 1);
  assert!(engine.store().queries().is_empty());
  assert_eq!(engine.store().state().commits, 0);
}

#[tokio::test]
async fn malformed_batch_is_fatal() {
  let (engine, _) =
    engine(vec![incoming(100_001, 111_223_333, 5001), incoming(100_001, 222_334_444, 5002)]).await;

  let aborted = engine
    .run_cycle(SyncKind::Full, &CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(aborted.error, SyncError::Fatal(_)));
  assert!(!aborted.error.is_retryable());
  assert_eq!(aborted.phase, CyclePhase::Fetching);
  assert!(engine.store().all_demographics().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_write_commits_nothing() {
  let store = RecordingStore::new(vec![]);
  store.fail_writes_after(1);
  let source = MemorySource::new(vec![
    incoming(100_001, 111_223_333, 5001),
    incoming(100_002, 222_334_444, 5002),
  ]);
  let engine = ReconciliationEngine::new(store, source, SyncConfig::default());

  let aborted = engine
    .run_cycle(SyncKind::Full, &CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(aborted.error, SyncError::Store(_)));
  assert!(aborted.error.is_retryable());
  assert_eq!(aborted.phase, CyclePhase::Committing);
  assert_eq!(aborted.report.inserted, 0);

  let state = engine.store().state();
  assert_eq!(state.commits, 0);
  assert!(state.demographics.is_empty());
  assert!(state.histories.is_empty());
}

#[tokio::test]
async fn empty_batch_opens_no_transaction() {
  let engine = ReconciliationEngine::new(
    RecordingStore::new(vec![]),
    MemorySource::new(vec![]),
    SyncConfig::default(),
  );
  let report = engine
    .run_cycle(SyncKind::Delta, &CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(report.status, CycleStatus::Completed);
  assert_eq!(engine.store().state().commits, 0);
  assert!(engine.store().queries().is_empty());
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

fn schedule(retry_attempts: u32) -> ScheduleConfig {
  ScheduleConfig { retry_attempts, retry_backoff_secs: 0, ..ScheduleConfig::default() }
}

fn scheduler(
  source: MemorySource,
  config: ScheduleConfig,
) -> (Scheduler<RecordingStore, Arc<MemorySource>>, Arc<MemorySource>) {
  let source = Arc::new(source);
  let engine = ReconciliationEngine::new(
    RecordingStore::new(vec![]),
    source.clone(),
    SyncConfig::default(),
  );
  (Scheduler::new(Arc::new(engine), config), source)
}

#[tokio::test]
async fn transient_failures_are_retried() {
  let source = MemorySource::new(vec![incoming(100_001, 111_223_333, 5001)]).failing_first(2);
  let (scheduler, source) = scheduler(source, schedule(3));

  let report = scheduler
    .run_with_retries(SyncKind::Full, &CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(report.inserted, 1);
  assert_eq!(source.fetches(), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
  let source = MemorySource::new(vec![]).failing_first(10);
  let (scheduler, source) = scheduler(source, schedule(2));

  let aborted = scheduler
    .run_with_retries(SyncKind::Full, &CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(aborted.error, SyncError::Source(_)));
  assert_eq!(source.fetches(), 3);
}

#[tokio::test]
async fn fatal_errors_are_not_retried() {
  let source = MemorySource::new(vec![
    incoming(100_001, 111_223_333, 5001),
    incoming(100_001, 222_334_444, 5002),
  ]);
  let (scheduler, source) = scheduler(source, schedule(3));

  let aborted = scheduler
    .run_with_retries(SyncKind::Full, &CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(aborted.error, SyncError::Fatal(_)));
  assert_eq!(source.fetches(), 1);
}

#[tokio::test]
async fn undecodable_source_file_is_not_retried() {
  let path = std::env::temp_dir().join(format!("roster-undecodable-{}.json", std::process::id()));
  let mut record = serde_json::to_value(incoming(100_001, 111_223_333, 5001)).unwrap();
  record.as_object_mut().unwrap().remove("external_id");
  std::fs::write(&path, serde_json::Value::Array(vec![record]).to_string()).unwrap();
  let engine = ReconciliationEngine::new(
    RecordingStore::new(vec![]),
    JsonFileSource::new(&path, 24),
    SyncConfig::default(),
  );
  // A retry would sleep for an hour and trip the timeout.
  let config =
    ScheduleConfig { retry_attempts: 3, retry_backoff_secs: 3600, ..ScheduleConfig::default() };
  let scheduler = Scheduler::new(Arc::new(engine), config);

  let aborted = tokio::time::timeout(
    std::time::Duration::from_secs(5),
    scheduler.run_with_retries(SyncKind::Full, &CancellationToken::new()),
  )
  .await
  .expect("no retry backoff")
  .unwrap_err();
  assert!(matches!(aborted.error, SyncError::Malformed(_)));
  assert!(!aborted.error.is_retryable());
  assert_eq!(aborted.phase, CyclePhase::Fetching);
  std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn scheduler_stops_when_cancelled() {
  let (scheduler, source) =
    scheduler(MemorySource::new(vec![incoming(100_001, 111_223_333, 5001)]), schedule(0));
  let cancel = CancellationToken::new();

  let stop = async {
    while source.fetches() == 0 {
      tokio::task::yield_now().await;
    }
    cancel.cancel();
  };
  tokio::join!(scheduler.run(&cancel), stop);

  // Only the startup cycle ran; the first interval had not elapsed.
  assert_eq!(source.fetches(), 1);
}
