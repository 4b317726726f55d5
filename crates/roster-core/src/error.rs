//! Error types for `roster-core`.

use thiserror::Error;

use crate::{
  demographic::{DemographicId, ExternalId},
  field::DemographicField,
};

#[derive(Debug, Error)]
pub enum Error {
  #[error("incoming record is missing required key {field} (external id {external_id:?})")]
  MissingKey {
    field:       &'static str,
    external_id: Option<ExternalId>,
  },

  #[error("incoming record {external_id} carries an out-of-range national id")]
  InvalidNationalId { external_id: ExternalId },

  #[error("external id {0} appears more than once in the incoming batch")]
  DuplicateExternalId(ExternalId),

  #[error("demographic not found: {0}")]
  DemographicNotFound(DemographicId),

  #[error("value of the wrong type for field {0}")]
  FieldTypeMismatch(DemographicField),

  #[error("stale delta for demographic {demographic_id}: {field} no longer holds the expected value")]
  StaleDelta {
    demographic_id: DemographicId,
    field:          DemographicField,
  },

  #[error("demographic {0} cannot be merged into itself")]
  SelfMerge(DemographicId),

  #[error("no unused placeholder national id is left")]
  PlaceholdersExhausted,

  #[error("command list invariant violated: {0}")]
  InvalidCommandList(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
