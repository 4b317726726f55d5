//! The `RecordStore` trait and the transaction handle the executor writes
//! through.
//!
//! The trait is implemented by storage backends (e.g. `roster-store-sqlite`).
//! The sync engine depends on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  audit::AuditRecord,
  command::DependentTable,
  demographic::{BadgeNumber, Demographic, DemographicId, ExternalId, IncomingRecord, NationalId},
  history::HistoryEntry,
};

// ─── Transaction ─────────────────────────────────────────────────────────────

/// Write access inside one store transaction.
///
/// Every call made through a handle either commits together with all the
/// others or not at all; the handle is only reachable from inside
/// [`RecordStore::with_transaction`].
pub trait StoreTransaction {
  type Error;

  /// Insert a new demographic and return its store-assigned id.
  fn insert_demographic(
    &mut self,
    record: &IncomingRecord,
    modified_at: DateTime<Utc>,
  ) -> Result<DemographicId, Self::Error>;

  fn load_demographic(&mut self, id: DemographicId) -> Result<Option<Demographic>, Self::Error>;

  /// Overwrite the stored row for `demographic.id`.
  fn save_demographic(&mut self, demographic: &Demographic) -> Result<(), Self::Error>;

  fn insert_history(
    &mut self,
    demographic_id: DemographicId,
    entry: &HistoryEntry,
  ) -> Result<(), Self::Error>;

  /// Bulk-update the national-id reference column of `table`; returns the
  /// number of rows rewritten.
  fn rewrite_national_id(
    &mut self,
    table: DependentTable,
    old: NationalId,
    new: NationalId,
  ) -> Result<u64, Self::Error>;

  fn write_audit(
    &mut self,
    record: &AuditRecord,
    recorded_at: DateTime<Utc>,
  ) -> Result<(), Self::Error>;

  /// Whether any demographic or dependent row references `id`.
  fn national_id_in_use(&mut self, id: NationalId) -> Result<bool, Self::Error>;
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Abstraction over the system-of-record backend.
///
/// Read methods are side-effect free and safe to retry. All mutation goes
/// through [`with_transaction`](RecordStore::with_transaction).
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + From<crate::Error> + Send + Sync + 'static;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Stored demographics whose external id is in `ids`.
  fn find_by_external_ids(
    &self,
    ids: Vec<ExternalId>,
  ) -> impl Future<Output = Result<Vec<Demographic>, Self::Error>> + Send + '_;

  /// Stored demographics matching any of the `(national id, badge)` pairs.
  fn find_by_national_id_badge_pairs(
    &self,
    pairs: Vec<(NationalId, BadgeNumber)>,
  ) -> impl Future<Output = Result<Vec<Demographic>, Self::Error>> + Send + '_;

  /// Stored demographics whose national id is in `ids`.
  fn find_by_national_ids(
    &self,
    ids: Vec<NationalId>,
  ) -> impl Future<Output = Result<Vec<Demographic>, Self::Error>> + Send + '_;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Run `work` inside one transaction. The transaction commits if `work`
  /// returns `Ok` and rolls back in full otherwise.
  fn with_transaction<F, T>(
    &self,
    work: F,
  ) -> impl Future<Output = Result<T, Self::Error>> + Send + '_
  where
    F: FnOnce(&mut dyn StoreTransaction<Error = Self::Error>) -> Result<T, Self::Error>
      + Send
      + 'static,
    T: Send + 'static;

  /// Delete sync-audit rows recorded before `cutoff`; returns the number
  /// removed.
  fn purge_audit_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}
