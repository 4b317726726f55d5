//! The validated set of incoming records for one sync cycle.

use std::collections::{BTreeMap, btree_map::Entry};

use crate::{
  Error, Result,
  demographic::{ExternalId, IncomingRecord},
};

/// Incoming records in source order, indexed by external id.
///
/// Construction rejects batches that cannot be reconciled safely: a record
/// without a usable external id, a national id outside the valid range, or an
/// external id delivered twice.
#[derive(Debug, Clone, Default)]
pub struct IncomingBatch {
  records:        Vec<IncomingRecord>,
  by_external_id: BTreeMap<ExternalId, IncomingRecord>,
}

impl IncomingBatch {
  pub fn new(records: Vec<IncomingRecord>) -> Result<Self> {
    let mut by_external_id = BTreeMap::new();
    for record in &records {
      if record.external_id.0 <= 0 {
        return Err(Error::MissingKey {
          field:       "external_id",
          external_id: None,
        });
      }
      if !record.national_id.is_valid() {
        return Err(Error::InvalidNationalId { external_id: record.external_id });
      }
      match by_external_id.entry(record.external_id) {
        Entry::Vacant(slot) => {
          slot.insert(record.clone());
        }
        Entry::Occupied(_) => return Err(Error::DuplicateExternalId(record.external_id)),
      }
    }
    Ok(Self { records, by_external_id })
  }

  pub fn records(&self) -> &[IncomingRecord] { &self.records }

  pub fn by_external_id(&self) -> &BTreeMap<ExternalId, IncomingRecord> {
    &self.by_external_id
  }

  pub fn get(&self, id: ExternalId) -> Option<&IncomingRecord> { self.by_external_id.get(&id) }

  pub fn len(&self) -> usize { self.records.len() }

  pub fn is_empty(&self) -> bool { self.records.is_empty() }
}
