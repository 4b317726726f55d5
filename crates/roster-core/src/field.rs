//! Field-level access to demographic values, used to compute and apply deltas.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
  Error, Result,
  demographic::{
    BadgeNumber, Demographic, EmploymentStatus, ExternalId, NationalId, RecordView,
  },
};

/// Every versioned field of a demographic.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumIter,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DemographicField {
  ExternalId,
  NationalId,
  BadgeNumber,
  FirstName,
  MiddleName,
  LastName,
  PhoneNumber,
  MobileNumber,
  EmailAddress,
  Street,
  Street2,
  City,
  State,
  PostalCode,
  Country,
  EmploymentStatus,
  EmploymentType,
  PayFrequency,
  PayClassification,
  StoreNumber,
  Department,
  Gender,
  DateOfBirth,
  HireDate,
  FullTimeDate,
  RehireDate,
  TerminationDate,
  TerminationCode,
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
  Text(Option<String>),
  Number(Option<i64>),
  Date(Option<NaiveDate>),
  Status(EmploymentStatus),
}

/// One field delta: the value held before the mutation and the value after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
  pub field:  DemographicField,
  pub before: FieldValue,
  pub after:  FieldValue,
}

impl DemographicField {
  /// All fields the sync-update diff compares. The national id is excluded:
  /// changes to it travel through the cascade path.
  pub fn diffable() -> impl Iterator<Item = DemographicField> {
    Self::iter().filter(|f| *f != DemographicField::NationalId)
  }

  pub fn read(self, record: &(impl RecordView + ?Sized)) -> FieldValue {
    use DemographicField as F;
    let p = record.profile();
    let c = &p.contact;
    let a = &p.address;
    let e = &p.employment;
    match self {
      F::ExternalId => FieldValue::Number(record.external_id().map(|id| id.0)),
      F::NationalId => FieldValue::Number(Some(i64::from(record.national_id().0))),
      F::BadgeNumber => FieldValue::Number(Some(i64::from(record.badge_number().0))),
      F::FirstName => FieldValue::Text(Some(c.first_name.clone())),
      F::MiddleName => FieldValue::Text(c.middle_name.clone()),
      F::LastName => FieldValue::Text(Some(c.last_name.clone())),
      F::PhoneNumber => FieldValue::Text(c.phone_number.clone()),
      F::MobileNumber => FieldValue::Text(c.mobile_number.clone()),
      F::EmailAddress => FieldValue::Text(c.email_address.clone()),
      F::Street => FieldValue::Text(Some(a.street.clone())),
      F::Street2 => FieldValue::Text(a.street2.clone()),
      F::City => FieldValue::Text(a.city.clone()),
      F::State => FieldValue::Text(a.state.clone()),
      F::PostalCode => FieldValue::Text(a.postal_code.clone()),
      F::Country => FieldValue::Text(a.country.clone()),
      F::EmploymentStatus => FieldValue::Status(e.status),
      F::EmploymentType => FieldValue::Text(e.employment_type.clone()),
      F::PayFrequency => FieldValue::Text(e.pay_frequency.clone()),
      F::PayClassification => FieldValue::Text(e.pay_classification.clone()),
      F::StoreNumber => FieldValue::Number(e.store_number),
      F::Department => FieldValue::Number(e.department),
      F::Gender => FieldValue::Text(e.gender.clone()),
      F::DateOfBirth => FieldValue::Date(e.date_of_birth),
      F::HireDate => FieldValue::Date(e.hire_date),
      F::FullTimeDate => FieldValue::Date(e.full_time_date),
      F::RehireDate => FieldValue::Date(e.rehire_date),
      F::TerminationDate => FieldValue::Date(e.termination_date),
      F::TerminationCode => FieldValue::Text(e.termination_code.clone()),
    }
  }

  /// Store `value` into `target`. Fails when the value's type does not fit
  /// the field, or when a required field would become empty.
  pub fn write(self, target: &mut Demographic, value: FieldValue) -> Result<()> {
    use DemographicField as F;
    let mismatch = || Error::FieldTypeMismatch(self);
    let p = &mut target.profile;
    match (self, value) {
      (F::ExternalId, FieldValue::Number(v)) => target.external_id = v.map(ExternalId),
      (F::NationalId, FieldValue::Number(Some(v))) => {
        target.national_id = NationalId(u32::try_from(v).map_err(|_| mismatch())?);
      }
      (F::BadgeNumber, FieldValue::Number(Some(v))) => {
        target.badge_number = BadgeNumber(u32::try_from(v).map_err(|_| mismatch())?);
      }
      (F::FirstName, FieldValue::Text(Some(v))) => p.contact.first_name = v,
      (F::MiddleName, FieldValue::Text(v)) => p.contact.middle_name = v,
      (F::LastName, FieldValue::Text(Some(v))) => p.contact.last_name = v,
      (F::PhoneNumber, FieldValue::Text(v)) => p.contact.phone_number = v,
      (F::MobileNumber, FieldValue::Text(v)) => p.contact.mobile_number = v,
      (F::EmailAddress, FieldValue::Text(v)) => p.contact.email_address = v,
      (F::Street, FieldValue::Text(Some(v))) => p.address.street = v,
      (F::Street2, FieldValue::Text(v)) => p.address.street2 = v,
      (F::City, FieldValue::Text(v)) => p.address.city = v,
      (F::State, FieldValue::Text(v)) => p.address.state = v,
      (F::PostalCode, FieldValue::Text(v)) => p.address.postal_code = v,
      (F::Country, FieldValue::Text(v)) => p.address.country = v,
      (F::EmploymentStatus, FieldValue::Status(v)) => p.employment.status = v,
      (F::EmploymentType, FieldValue::Text(v)) => p.employment.employment_type = v,
      (F::PayFrequency, FieldValue::Text(v)) => p.employment.pay_frequency = v,
      (F::PayClassification, FieldValue::Text(v)) => {
        p.employment.pay_classification = v;
      }
      (F::StoreNumber, FieldValue::Number(v)) => p.employment.store_number = v,
      (F::Department, FieldValue::Number(v)) => p.employment.department = v,
      (F::Gender, FieldValue::Text(v)) => p.employment.gender = v,
      (F::DateOfBirth, FieldValue::Date(v)) => p.employment.date_of_birth = v,
      (F::HireDate, FieldValue::Date(v)) => p.employment.hire_date = v,
      (F::FullTimeDate, FieldValue::Date(v)) => p.employment.full_time_date = v,
      (F::RehireDate, FieldValue::Date(v)) => p.employment.rehire_date = v,
      (F::TerminationDate, FieldValue::Date(v)) => p.employment.termination_date = v,
      (F::TerminationCode, FieldValue::Text(v)) => p.employment.termination_code = v,
      _ => return Err(mismatch()),
    }
    Ok(())
  }
}

/// Field deltas that would turn `existing` into `incoming`, national id
/// excluded. Empty when the two agree on every compared field.
pub fn field_delta(
  existing: &(impl RecordView + ?Sized),
  incoming: &(impl RecordView + ?Sized),
) -> Vec<FieldChange> {
  DemographicField::diffable()
    .filter_map(|field| {
      let before = field.read(existing);
      let after = field.read(incoming);
      (before != after).then_some(FieldChange { field, before, after })
    })
    .collect()
}

impl Demographic {
  /// Apply a delta after checking that the field still holds `before`.
  pub fn apply_change(&mut self, change: &FieldChange) -> Result<()> {
    if change.field.read(self) != change.before {
      return Err(Error::StaleDelta {
        demographic_id: self.id,
        field:          change.field,
      });
    }
    change.field.write(self, change.after.clone())
  }
}
