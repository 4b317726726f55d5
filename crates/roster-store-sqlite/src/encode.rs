//! Encoding and decoding helpers between domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Identifiers are integers. The profile,
//! history snapshot and audit payload are compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use roster_core::{
  audit::{AuditKind, AuditRecord},
  command::DependentTable,
  demographic::{BadgeNumber, Demographic, DemographicId, ExternalId, NationalId, Profile},
  history::{HistoryEntry, HistoryReason},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// Fixed-width so that string comparison in SQL orders chronologically.
pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

pub fn decode_national_id(raw: i64) -> Result<NationalId> {
  u32::try_from(raw)
    .map(NationalId)
    .map_err(|_| Error::Decode { column: "national_id", value: raw.to_string() })
}

pub fn decode_badge(raw: i64) -> Result<BadgeNumber> {
  u32::try_from(raw)
    .map(BadgeNumber)
    .map_err(|_| Error::Decode { column: "badge_number", value: raw.to_string() })
}

// ─── Enums ───────────────────────────────────────────────────────────────────

/// The dependent table's SQL name. Only ever interpolated from this closed
/// set, never from input.
pub fn dependent_table_name(t: DependentTable) -> &'static str {
  match t {
    DependentTable::BeneficiaryContacts => "beneficiary_contacts",
    DependentTable::ProfitDetails => "profit_details",
  }
}

pub fn decode_reason(s: &str) -> Result<HistoryReason> {
  s.parse()
    .map_err(|_| Error::Decode { column: "reason", value: s.to_owned() })
}

pub fn decode_audit_kind(s: &str) -> Result<AuditKind> {
  s.parse()
    .map_err(|_| Error::Decode { column: "kind", value: s.to_owned() })
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const DEMOGRAPHIC_COLUMNS: &str =
  "demographic_id, external_id, national_id, badge_number, profile_json, modified_at";

/// Raw values read directly from a `demographics` row.
pub struct RawDemographic {
  pub demographic_id: i64,
  pub external_id:    Option<i64>,
  pub national_id:    i64,
  pub badge_number:   i64,
  pub profile_json:   String,
  pub modified_at:    String,
}

impl RawDemographic {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      demographic_id: row.get(0)?,
      external_id:    row.get(1)?,
      national_id:    row.get(2)?,
      badge_number:   row.get(3)?,
      profile_json:   row.get(4)?,
      modified_at:    row.get(5)?,
    })
  }

  pub fn into_demographic(self) -> Result<Demographic> {
    let profile: Profile = serde_json::from_str(&self.profile_json)?;
    Ok(Demographic {
      id: DemographicId(self.demographic_id),
      external_id: self.external_id.map(ExternalId),
      national_id: decode_national_id(self.national_id)?,
      badge_number: decode_badge(self.badge_number)?,
      profile,
      modified_at: decode_dt(&self.modified_at)?,
    })
  }
}

/// Raw values read from a `demographic_histories` row.
pub struct RawHistory {
  pub reason:        String,
  pub recorded_at:   String,
  pub snapshot_json: String,
}

impl RawHistory {
  pub fn into_entry(self) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
      reason:      decode_reason(&self.reason)?,
      recorded_at: decode_dt(&self.recorded_at)?,
      snapshot:    serde_json::from_str(&self.snapshot_json)?,
    })
  }
}

/// Raw values read from a `demographic_sync_audit` row.
pub struct RawAudit {
  pub kind:         String,
  pub national_id:  i64,
  pub message:      String,
  pub payload_json: String,
}

impl RawAudit {
  pub fn into_record(self) -> Result<AuditRecord> {
    Ok(AuditRecord {
      kind:        decode_audit_kind(&self.kind)?,
      national_id: decode_national_id(self.national_id)?,
      message:     self.message,
      payload:     serde_json::from_str(&self.payload_json)?,
    })
  }
}
