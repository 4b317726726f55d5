//! History entries: immutable snapshots of a demographic taken before each
//! mutation the sync engine applies.
//!
//! Entries are append-only. Nothing in this workspace updates or deletes one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::demographic::{BadgeNumber, ExternalId, NationalId, Profile, RecordView};

/// Why a history entry was written.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HistoryReason {
  /// Baseline written alongside the insert of a new demographic.
  Initial,
  /// Field values changed by a regular sync.
  SyncUpdate,
  /// The national id changed; dependent rows were cascaded.
  SsnChange,
}

/// The complete set of values a demographic held at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemographicSnapshot {
  pub external_id:  Option<ExternalId>,
  pub national_id:  NationalId,
  pub badge_number: BadgeNumber,
  pub profile:      Profile,
}

impl DemographicSnapshot {
  pub fn of(record: &(impl RecordView + ?Sized)) -> Self {
    Self {
      external_id:  record.external_id(),
      national_id:  record.national_id(),
      badge_number: record.badge_number(),
      profile:      record.profile().clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub reason:      HistoryReason,
  pub recorded_at: DateTime<Utc>,
  pub snapshot:    DemographicSnapshot,
}

impl HistoryEntry {
  pub fn new(
    reason: HistoryReason,
    recorded_at: DateTime<Utc>,
    record: &(impl RecordView + ?Sized),
  ) -> Self {
    Self { reason, recorded_at, snapshot: DemographicSnapshot::of(record) }
  }
}
