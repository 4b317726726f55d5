//! The SQLite implementation of [`RecordStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use tracing::debug;

use roster_core::{
  audit::AuditRecord,
  command::DependentTable,
  demographic::{BadgeNumber, Demographic, DemographicId, ExternalId, IncomingRecord, NationalId},
  history::HistoryEntry,
  store::{RecordStore, StoreTransaction},
};

use crate::{
  Error, Result,
  encode::{
    DEMOGRAPHIC_COLUMNS, RawAudit, RawDemographic, RawHistory, dependent_table_name, encode_dt,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A record store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All access
/// is serialised through the connection's worker thread, so a transaction
/// opened by [`RecordStore::with_transaction`] never interleaves with a read.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run a `SELECT` over `demographics` with positional integer parameters.
  async fn query_demographics(&self, sql: String, params: Vec<i64>) -> Result<Vec<Demographic>> {
    let raws: Vec<RawDemographic> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), RawDemographic::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDemographic::into_demographic).collect()
  }

  // ── Inspection ────────────────────────────────────────────────────────────

  /// Every stored demographic, ordered by id.
  pub async fn all_demographics(&self) -> Result<Vec<Demographic>> {
    self
      .query_demographics(
        format!("SELECT {DEMOGRAPHIC_COLUMNS} FROM demographics ORDER BY demographic_id"),
        vec![],
      )
      .await
  }

  /// History entries for one demographic, oldest first.
  pub async fn history_for(&self, id: DemographicId) -> Result<Vec<HistoryEntry>> {
    let raws: Vec<RawHistory> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT reason, recorded_at, snapshot_json
           FROM demographic_histories
           WHERE demographic_id = ?1
           ORDER BY history_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id.0], |row| {
            Ok(RawHistory {
              reason:        row.get(0)?,
              recorded_at:   row.get(1)?,
              snapshot_json: row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistory::into_entry).collect()
  }

  /// Every sync-audit row, oldest first.
  pub async fn audit_records(&self) -> Result<Vec<AuditRecord>> {
    let raws: Vec<RawAudit> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT kind, national_id, message, payload_json
           FROM demographic_sync_audit
           ORDER BY audit_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawAudit {
              kind:         row.get(0)?,
              national_id:  row.get(1)?,
              message:      row.get(2)?,
              payload_json: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAudit::into_record).collect()
  }

  /// Add a row to a dependent table. Those tables belong to other
  /// subsystems; this exists for seeding and tests.
  pub async fn add_dependent(&self, table: DependentTable, national_id: NationalId) -> Result<()> {
    let sql = format!(
      "INSERT INTO {} (national_id) VALUES (?1)",
      dependent_table_name(table)
    );
    self
      .conn
      .call(move |conn| {
        conn.execute(&sql, rusqlite::params![national_id.0])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Number of `table` rows referencing `national_id`.
  pub async fn count_dependents(&self, table: DependentTable, national_id: NationalId) -> Result<u64> {
    let sql = format!(
      "SELECT COUNT(*) FROM {} WHERE national_id = ?1",
      dependent_table_name(table)
    );
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&sql, rusqlite::params![national_id.0], |r| r.get(0))?)
      })
      .await?;
    Ok(count.max(0) as u64)
  }
}

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn find_by_external_ids(&self, ids: Vec<ExternalId>) -> Result<Vec<Demographic>> {
    if ids.is_empty() {
      return Ok(vec![]);
    }
    let sql = format!(
      "SELECT {DEMOGRAPHIC_COLUMNS} FROM demographics WHERE external_id IN ({})",
      placeholders(ids.len())
    );
    self
      .query_demographics(sql, ids.into_iter().map(|id| id.0).collect())
      .await
  }

  async fn find_by_national_id_badge_pairs(
    &self,
    pairs: Vec<(NationalId, BadgeNumber)>,
  ) -> Result<Vec<Demographic>> {
    if pairs.is_empty() {
      return Ok(vec![]);
    }
    let values = vec!["(?, ?)"; pairs.len()].join(", ");
    let sql = format!(
      "SELECT {DEMOGRAPHIC_COLUMNS} FROM demographics
       WHERE (national_id, badge_number) IN (VALUES {values})"
    );
    let params = pairs
      .into_iter()
      .flat_map(|(ssn, badge)| [i64::from(ssn.0), i64::from(badge.0)])
      .collect();
    self.query_demographics(sql, params).await
  }

  async fn find_by_national_ids(&self, ids: Vec<NationalId>) -> Result<Vec<Demographic>> {
    if ids.is_empty() {
      return Ok(vec![]);
    }
    let sql = format!(
      "SELECT {DEMOGRAPHIC_COLUMNS} FROM demographics WHERE national_id IN ({})",
      placeholders(ids.len())
    );
    self
      .query_demographics(sql, ids.into_iter().map(|id| i64::from(id.0)).collect())
      .await
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn with_transaction<F, T>(&self, work: F) -> Result<T>
  where
    F: FnOnce(&mut dyn StoreTransaction<Error = Error>) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut handle = SqliteTx { tx };
        match work(&mut handle) {
          Ok(value) => {
            handle.tx.commit()?;
            Ok(Ok(value))
          }
          Err(e) => {
            handle.tx.rollback()?;
            Ok(Err(e))
          }
        }
      })
      .await?;
    outcome
  }

  async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let cutoff_str = encode_dt(cutoff);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM demographic_sync_audit WHERE recorded_at < ?1",
          rusqlite::params![cutoff_str],
        )?)
      })
      .await?;
    debug!(removed, "purged sync audit rows");
    Ok(removed as u64)
  }
}

// ─── Transaction handle ──────────────────────────────────────────────────────

struct SqliteTx<'c> {
  tx: rusqlite::Transaction<'c>,
}

impl StoreTransaction for SqliteTx<'_> {
  type Error = Error;

  fn insert_demographic(
    &mut self,
    record: &IncomingRecord,
    modified_at: DateTime<Utc>,
  ) -> Result<DemographicId> {
    let profile_json = serde_json::to_string(&record.profile)?;
    self.tx.execute(
      "INSERT INTO demographics (
         external_id, national_id, badge_number, profile_json, modified_at
       ) VALUES (?1, ?2, ?3, ?4, ?5)",
      rusqlite::params![
        record.external_id.0,
        record.national_id.0,
        record.badge_number.0,
        profile_json,
        encode_dt(modified_at),
      ],
    )?;
    Ok(DemographicId(self.tx.last_insert_rowid()))
  }

  fn load_demographic(&mut self, id: DemographicId) -> Result<Option<Demographic>> {
    let raw = self
      .tx
      .query_row(
        &format!("SELECT {DEMOGRAPHIC_COLUMNS} FROM demographics WHERE demographic_id = ?1"),
        rusqlite::params![id.0],
        RawDemographic::from_row,
      )
      .optional()?;
    raw.map(RawDemographic::into_demographic).transpose()
  }

  fn save_demographic(&mut self, demographic: &Demographic) -> Result<()> {
    let profile_json = serde_json::to_string(&demographic.profile)?;
    let changed = self.tx.execute(
      "UPDATE demographics
       SET external_id = ?1, national_id = ?2, badge_number = ?3,
           profile_json = ?4, modified_at = ?5
       WHERE demographic_id = ?6",
      rusqlite::params![
        demographic.external_id.map(|id| id.0),
        demographic.national_id.0,
        demographic.badge_number.0,
        profile_json,
        encode_dt(demographic.modified_at),
        demographic.id.0,
      ],
    )?;
    if changed == 0 {
      return Err(roster_core::Error::DemographicNotFound(demographic.id).into());
    }
    Ok(())
  }

  fn insert_history(&mut self, demographic_id: DemographicId, entry: &HistoryEntry) -> Result<()> {
    let snapshot_json = serde_json::to_string(&entry.snapshot)?;
    self.tx.execute(
      "INSERT INTO demographic_histories (demographic_id, reason, recorded_at, snapshot_json)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![
        demographic_id.0,
        entry.reason.as_ref(),
        encode_dt(entry.recorded_at),
        snapshot_json,
      ],
    )?;
    Ok(())
  }

  fn rewrite_national_id(
    &mut self,
    table: DependentTable,
    old: NationalId,
    new: NationalId,
  ) -> Result<u64> {
    let sql = format!(
      "UPDATE {} SET national_id = ?1 WHERE national_id = ?2",
      dependent_table_name(table)
    );
    let rewritten = self.tx.execute(&sql, rusqlite::params![new.0, old.0])?;
    Ok(rewritten as u64)
  }

  fn write_audit(&mut self, record: &AuditRecord, recorded_at: DateTime<Utc>) -> Result<()> {
    let payload_json = serde_json::to_string(&record.payload)?;
    self.tx.execute(
      "INSERT INTO demographic_sync_audit (kind, national_id, message, payload_json, recorded_at)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      rusqlite::params![
        record.kind.as_ref(),
        record.national_id.0,
        record.message,
        payload_json,
        encode_dt(recorded_at),
      ],
    )?;
    Ok(())
  }

  fn national_id_in_use(&mut self, id: NationalId) -> Result<bool> {
    let in_use = self.tx.query_row(
      "SELECT EXISTS (SELECT 1 FROM demographics WHERE national_id = ?1)
           OR EXISTS (SELECT 1 FROM beneficiary_contacts WHERE national_id = ?1)
           OR EXISTS (SELECT 1 FROM profit_details WHERE national_id = ?1)",
      rusqlite::params![id.0],
      |row| row.get(0),
    )?;
    Ok(in_use)
  }
}
