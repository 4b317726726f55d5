//! The system-of-record entity for one person.
//!
//! A demographic is matched against incoming HR records by its external id
//! first and by `(national id, badge number)` second. It is never deleted by
//! the sync engine; employment-status transitions end its active life.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Surrogate key assigned by the store on insert.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DemographicId(pub i64);

impl fmt::Display for DemographicId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// The HR source-of-truth's durable person id. Primary match key.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ExternalId(pub i64);

impl fmt::Display for ExternalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Government-issued person identifier (SSN).
///
/// `Display` masks all but the last four digits; use `.0` when the raw value
/// is genuinely needed (queries, audit payloads).
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NationalId(pub u32);

impl NationalId {
  pub const MAX: u32 = 999_999_999;

  /// Area numbers 900-999 are never issued. Placeholders for retired
  /// duplicates are drawn from here.
  pub const PLACEHOLDER_START: u32 = 900_000_000;

  pub fn is_valid(self) -> bool { (1..=Self::MAX).contains(&self.0) }

  pub fn is_placeholder(self) -> bool { (Self::PLACEHOLDER_START..=Self::MAX).contains(&self.0) }

  pub fn masked(self) -> String { format!("XXX-XX-{:04}", self.0 % 10_000) }
}

impl fmt::Display for NationalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.masked())
  }
}

/// Human-facing employee number. Zero means "unassigned".
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BadgeNumber(pub u32);

impl BadgeNumber {
  /// Sentinel for a person who has not been issued a badge yet. Never used
  /// as a match key.
  pub const UNASSIGNED: BadgeNumber = BadgeNumber(0);

  pub fn is_assigned(self) -> bool { self != Self::UNASSIGNED }
}

impl fmt::Display for BadgeNumber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

// ─── Profile ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
  pub first_name:    String,
  pub middle_name:   Option<String>,
  pub last_name:     String,
  pub phone_number:  Option<String>,
  pub mobile_number: Option<String>,
  pub email_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
  pub street:      String,
  pub street2:     Option<String>,
  pub city:        Option<String>,
  pub state:       Option<String>,
  pub postal_code: Option<String>,
  pub country:     Option<String>,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EmploymentStatus {
  #[default]
  Active,
  Inactive,
  Terminated,
  Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employment {
  pub status:             EmploymentStatus,
  pub employment_type:    Option<String>,
  pub pay_frequency:      Option<String>,
  pub pay_classification: Option<String>,
  pub store_number:       Option<i64>,
  pub department:         Option<i64>,
  pub gender:             Option<String>,
  pub date_of_birth:      Option<NaiveDate>,
  pub hire_date:          Option<NaiveDate>,
  pub full_time_date:     Option<NaiveDate>,
  pub rehire_date:        Option<NaiveDate>,
  pub termination_date:   Option<NaiveDate>,
  pub termination_code:   Option<String>,
}

/// Everything about a person except the identity keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  pub contact:    ContactInfo,
  pub address:    Address,
  pub employment: Employment,
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A stored demographic row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demographic {
  pub id:           DemographicId,
  /// `None` for legacy rows imported before the HR id was known.
  pub external_id:  Option<ExternalId>,
  pub national_id:  NationalId,
  pub badge_number: BadgeNumber,
  pub profile:      Profile,
  pub modified_at:  DateTime<Utc>,
}

/// One record of the current sync cycle, as delivered by the HR source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRecord {
  pub external_id:       ExternalId,
  pub national_id:       NationalId,
  #[serde(default)]
  pub badge_number:      BadgeNumber,
  pub profile:           Profile,
  /// Last-modified stamp in the source system; drives delta windows.
  #[serde(default)]
  pub source_updated_at: Option<DateTime<Utc>>,
}

impl Default for BadgeNumber {
  fn default() -> Self { Self::UNASSIGNED }
}

/// Read access shared by stored and incoming records, so matching, auditing
/// and diffing can treat both uniformly.
pub trait RecordView {
  fn external_id(&self) -> Option<ExternalId>;
  fn national_id(&self) -> NationalId;
  fn badge_number(&self) -> BadgeNumber;
  fn profile(&self) -> &Profile;

  /// The fallback match key, or `None` when the badge is unassigned.
  fn match_pair(&self) -> Option<(NationalId, BadgeNumber)> {
    let badge = self.badge_number();
    badge.is_assigned().then(|| (self.national_id(), badge))
  }
}

impl RecordView for Demographic {
  fn external_id(&self) -> Option<ExternalId> { self.external_id }
  fn national_id(&self) -> NationalId { self.national_id }
  fn badge_number(&self) -> BadgeNumber { self.badge_number }
  fn profile(&self) -> &Profile { &self.profile }
}

impl RecordView for IncomingRecord {
  fn external_id(&self) -> Option<ExternalId> { Some(self.external_id) }
  fn national_id(&self) -> NationalId { self.national_id }
  fn badge_number(&self) -> BadgeNumber { self.badge_number }
  fn profile(&self) -> &Profile { &self.profile }
}
