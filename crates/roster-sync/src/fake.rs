//! An in-memory [`RecordStore`] that records every lookup it serves.

use std::sync::{
  Mutex,
  atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use roster_core::{
  Error, Result,
  audit::AuditRecord,
  command::DependentTable,
  demographic::{
    BadgeNumber, Demographic, DemographicId, ExternalId, IncomingRecord, NationalId, Profile,
  },
  history::HistoryEntry,
  store::{RecordStore, StoreTransaction},
};

use tokio_util::sync::CancellationToken;

use crate::source::{RecordSource, SyncKind};

/// One store lookup, as issued.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
  ExternalIds(Vec<ExternalId>),
  Pairs(Vec<(NationalId, BadgeNumber)>),
  NationalIds(Vec<NationalId>),
}

#[derive(Debug, Clone, Default)]
pub struct FakeState {
  pub demographics: Vec<Demographic>,
  pub histories:    Vec<(DemographicId, HistoryEntry)>,
  pub dependents:   Vec<(DependentTable, NationalId)>,
  pub audits:       Vec<AuditRecord>,
  pub commits:      usize,
}

#[derive(Default)]
pub struct RecordingStore {
  state:      Mutex<FakeState>,
  queries:    Mutex<Vec<Query>>,
  fail_after: Mutex<Option<usize>>,
}

impl RecordingStore {
  pub fn new(demographics: Vec<Demographic>) -> Self {
    Self {
      state: Mutex::new(FakeState { demographics, ..FakeState::default() }),
      ..Self::default()
    }
  }

  pub fn queries(&self) -> Vec<Query> { self.queries.lock().unwrap().clone() }

  pub fn state(&self) -> FakeState { self.state.lock().unwrap().clone() }

  pub fn add_dependent(&self, table: DependentTable, national_id: NationalId) {
    self.state.lock().unwrap().dependents.push((table, national_id));
  }

  /// Make every transaction fail once it has performed `n` writes.
  pub fn fail_writes_after(&self, n: usize) { *self.fail_after.lock().unwrap() = Some(n); }

  fn record(&self, query: Query) { self.queries.lock().unwrap().push(query); }

  fn select(&self, keep: impl Fn(&Demographic) -> bool) -> Vec<Demographic> {
    let state = self.state.lock().unwrap();
    state.demographics.iter().filter(|d| keep(d)).cloned().collect()
  }
}

impl RecordStore for RecordingStore {
  type Error = Error;

  async fn find_by_external_ids(&self, ids: Vec<ExternalId>) -> Result<Vec<Demographic>> {
    self.record(Query::ExternalIds(ids.clone()));
    Ok(self.select(|d| d.external_id.is_some_and(|id| ids.contains(&id))))
  }

  async fn find_by_national_id_badge_pairs(
    &self,
    pairs: Vec<(NationalId, BadgeNumber)>,
  ) -> Result<Vec<Demographic>> {
    self.record(Query::Pairs(pairs.clone()));
    Ok(self.select(|d| pairs.contains(&(d.national_id, d.badge_number))))
  }

  async fn find_by_national_ids(&self, ids: Vec<NationalId>) -> Result<Vec<Demographic>> {
    self.record(Query::NationalIds(ids.clone()));
    Ok(self.select(|d| ids.contains(&d.national_id)))
  }

  async fn with_transaction<F, T>(&self, work: F) -> Result<T>
  where
    F: FnOnce(&mut dyn StoreTransaction<Error = Error>) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let fail_after = *self.fail_after.lock().unwrap();
    let mut state = self.state.lock().unwrap();
    let mut tx = FakeTx { state: state.clone(), writes: 0, fail_after };
    let value = work(&mut tx)?;
    tx.state.commits += 1;
    *state = tx.state;
    Ok(value)
  }

  async fn purge_audit_before(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
    let mut state = self.state.lock().unwrap();
    let removed = state.audits.len() as u64;
    state.audits.clear();
    Ok(removed)
  }
}

/// Works on a private copy of the state; the copy replaces the original only
/// when the transaction's work succeeds.
struct FakeTx {
  state:      FakeState,
  writes:     usize,
  fail_after: Option<usize>,
}

impl FakeTx {
  fn write(&mut self) -> Result<()> {
    if self.fail_after.is_some_and(|n| self.writes >= n) {
      return Err(Error::InvalidCommandList("injected write failure".into()));
    }
    self.writes += 1;
    Ok(())
  }
}

impl StoreTransaction for FakeTx {
  type Error = Error;

  fn insert_demographic(
    &mut self,
    record: &IncomingRecord,
    modified_at: DateTime<Utc>,
  ) -> Result<DemographicId> {
    self.write()?;
    if self.state.demographics.iter().any(|d| d.external_id == Some(record.external_id)) {
      return Err(Error::DuplicateExternalId(record.external_id));
    }
    let next = self.state.demographics.iter().map(|d| d.id.0).max().unwrap_or(0) + 1;
    self.state.demographics.push(Demographic {
      id: DemographicId(next),
      external_id: Some(record.external_id),
      national_id: record.national_id,
      badge_number: record.badge_number,
      profile: record.profile.clone(),
      modified_at,
    });
    Ok(DemographicId(next))
  }

  fn load_demographic(&mut self, id: DemographicId) -> Result<Option<Demographic>> {
    Ok(self.state.demographics.iter().find(|d| d.id == id).cloned())
  }

  fn save_demographic(&mut self, demographic: &Demographic) -> Result<()> {
    self.write()?;
    let slot = self
      .state
      .demographics
      .iter_mut()
      .find(|d| d.id == demographic.id)
      .ok_or(Error::DemographicNotFound(demographic.id))?;
    *slot = demographic.clone();
    Ok(())
  }

  fn insert_history(&mut self, demographic_id: DemographicId, entry: &HistoryEntry) -> Result<()> {
    self.write()?;
    self.state.histories.push((demographic_id, entry.clone()));
    Ok(())
  }

  fn rewrite_national_id(
    &mut self,
    table: DependentTable,
    old: NationalId,
    new: NationalId,
  ) -> Result<u64> {
    self.write()?;
    let mut rewritten = 0;
    for (t, nid) in &mut self.state.dependents {
      if *t == table && *nid == old {
        *nid = new;
        rewritten += 1;
      }
    }
    Ok(rewritten)
  }

  fn write_audit(&mut self, record: &AuditRecord, _recorded_at: DateTime<Utc>) -> Result<()> {
    self.write()?;
    self.state.audits.push(record.clone());
    Ok(())
  }

  fn national_id_in_use(&mut self, id: NationalId) -> Result<bool> {
    Ok(
      self.state.demographics.iter().any(|d| d.national_id == id)
        || self.state.dependents.iter().any(|(_, nid)| *nid == id),
    )
  }
}

// ─── Source ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("source unavailable")]
pub struct SourceDown;

/// Serves a fixed batch, optionally failing the first few fetches.
#[derive(Default)]
pub struct MemorySource {
  records:    Mutex<Vec<IncomingRecord>>,
  fail_first: AtomicUsize,
  fetches:    AtomicUsize,
  cancel:     Mutex<Option<CancellationToken>>,
}

impl MemorySource {
  pub fn new(records: Vec<IncomingRecord>) -> Self {
    Self { records: Mutex::new(records), ..Self::default() }
  }

  pub fn failing_first(self, n: usize) -> Self {
    self.fail_first.store(n, Ordering::SeqCst);
    self
  }

  /// Cancel `token` from inside every fetch, as an interrupt arriving
  /// mid-read would.
  pub fn cancelling(self, token: CancellationToken) -> Self {
    *self.cancel.lock().unwrap() = Some(token);
    self
  }

  pub fn replace(&self, records: Vec<IncomingRecord>) { *self.records.lock().unwrap() = records; }

  pub fn fetches(&self) -> usize { self.fetches.load(Ordering::SeqCst) }
}

impl RecordSource for MemorySource {
  type Error = SourceDown;

  async fn fetch(&self, _kind: SyncKind) -> std::result::Result<Vec<IncomingRecord>, SourceDown> {
    let attempt = self.fetches.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = self.cancel.lock().unwrap().as_ref() {
      token.cancel();
    }
    if attempt < self.fail_first.load(Ordering::SeqCst) {
      return Err(SourceDown);
    }
    Ok(self.records.lock().unwrap().clone())
  }
}

// ─── Builders ────────────────────────────────────────────────────────────────

pub fn profile(last_name: &str) -> Profile {
  let mut profile = Profile::default();
  profile.contact.first_name = "Pat".into();
  profile.contact.last_name = last_name.into();
  profile.address.street = "12 Elm St".into();
  profile.address.city = Some("Tewksbury".into());
  profile
}

pub fn demographic(
  id: i64,
  external_id: Option<i64>,
  national_id: u32,
  badge: u32,
) -> Demographic {
  Demographic {
    id:           DemographicId(id),
    external_id:  external_id.map(ExternalId),
    national_id:  NationalId(national_id),
    badge_number: BadgeNumber(badge),
    profile:      profile("Smith"),
    modified_at:  Utc::now(),
  }
}

pub fn incoming(external_id: i64, national_id: u32, badge: u32) -> IncomingRecord {
  IncomingRecord {
    external_id:       ExternalId(external_id),
    national_id:       NationalId(national_id),
    badge_number:      BadgeNumber(badge),
    profile:           profile("Smith"),
    source_updated_at: None,
  }
}
