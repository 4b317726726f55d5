//! Matching engine: resolves incoming records to stored demographics.
//!
//! The external id is the authoritative key. The `(national id, badge)` pair
//! is consulted only for incoming records whose external id resolved to
//! nothing, and never with an unassigned badge.

use std::collections::{BTreeMap, HashMap, HashSet};

use roster_core::{
  batch::IncomingBatch,
  demographic::{
    BadgeNumber, Demographic, DemographicId, ExternalId, IncomingRecord, NationalId, RecordView,
  },
  store::RecordStore,
};
use tracing::debug;

use crate::config::SyncConfig;

// ─── Store lookups ───────────────────────────────────────────────────────────

/// Stored records whose external id is a key of `incoming`. An empty map
/// issues no query.
pub async fn match_by_external_id<S: RecordStore>(
  store: &S,
  incoming: &BTreeMap<ExternalId, IncomingRecord>,
  chunk_size: usize,
) -> Result<Vec<Demographic>, S::Error> {
  let ids: Vec<ExternalId> = incoming.keys().copied().collect();
  let mut found = Vec::new();
  for chunk in ids.chunks(chunk_size.max(1)) {
    found.extend(store.find_by_external_ids(chunk.to_vec()).await?);
  }
  Ok(found)
}

/// Result of the fallback lookup.
#[derive(Debug, Default)]
pub struct FallbackMatch {
  pub matched:              Vec<Demographic>,
  /// Pairs were supplied but every one carried an unassigned badge, so the
  /// store was not queried.
  pub all_pairs_zero_badge: bool,
}

/// Distinct pairs with an assigned badge, in first-seen order.
pub fn usable_pairs(pairs: &[(NationalId, BadgeNumber)]) -> Vec<(NationalId, BadgeNumber)> {
  let mut seen = HashSet::new();
  pairs
    .iter()
    .copied()
    .filter(|(_, badge)| badge.is_assigned())
    .filter(|pair| seen.insert(*pair))
    .collect()
}

/// Stored records matching any usable `(national id, badge)` pair. Each
/// query carries at most `pairs_per_query` whole pairs.
pub async fn match_by_fallback<S: RecordStore>(
  store: &S,
  pairs: &[(NationalId, BadgeNumber)],
  pairs_per_query: usize,
) -> Result<FallbackMatch, S::Error> {
  let usable = usable_pairs(pairs);
  if usable.is_empty() {
    let all_pairs_zero_badge = !pairs.is_empty();
    if all_pairs_zero_badge {
      debug!(pairs = pairs.len(), "every fallback pair has an unassigned badge; skipping lookup");
    }
    return Ok(FallbackMatch { matched: vec![], all_pairs_zero_badge });
  }

  let mut matched = Vec::new();
  for chunk in usable.chunks(pairs_per_query.max(1)) {
    matched.extend(store.find_by_national_id_badge_pairs(chunk.to_vec()).await?);
  }
  Ok(FallbackMatch { matched, all_pairs_zero_badge: false })
}

/// Stored records sharing a national id with any of `ids`.
pub async fn find_by_national_ids<S: RecordStore>(
  store: &S,
  ids: &[NationalId],
  chunk_size: usize,
) -> Result<Vec<Demographic>, S::Error> {
  let mut found = Vec::new();
  for chunk in ids.chunks(chunk_size.max(1)) {
    found.extend(store.find_by_national_ids(chunk.to_vec()).await?);
  }
  Ok(found)
}

// ─── Matching phase ──────────────────────────────────────────────────────────

/// Everything the read phase learns about the store for one batch.
#[derive(Debug, Default)]
pub struct MatchOutcome {
  pub primary_matched:        usize,
  pub fallback_matched:       usize,
  pub skipped_all_zero_badge: bool,
  /// Primary and fallback matches, deduplicated, ordered by id.
  pub existing:               Vec<Demographic>,
  /// Unmatched stored records that share a national id with the batch.
  /// Consulted by the auditor only.
  pub peers:                  Vec<Demographic>,
}

/// Run both match paths and the peer lookup for `batch`.
pub async fn resolve<S: RecordStore>(
  store: &S,
  batch: &IncomingBatch,
  config: &SyncConfig,
) -> Result<MatchOutcome, S::Error> {
  let primary =
    match_by_external_id(store, batch.by_external_id(), config.id_chunk_size()).await?;
  let resolved: HashSet<ExternalId> = primary.iter().filter_map(|d| d.external_id).collect();

  let fallback_pairs: Vec<(NationalId, BadgeNumber)> = batch
    .records()
    .iter()
    .filter(|r| !resolved.contains(&r.external_id))
    .map(|r| (r.national_id, r.badge_number))
    .collect();
  let fallback = match_by_fallback(store, &fallback_pairs, config.pair_chunk_size()).await?;

  let primary_matched = primary.len();
  let fallback_matched = fallback.matched.len();

  let mut by_id: BTreeMap<DemographicId, Demographic> = BTreeMap::new();
  for d in primary.into_iter().chain(fallback.matched) {
    by_id.entry(d.id).or_insert(d);
  }

  let mut national_ids: Vec<NationalId> = batch.records().iter().map(|r| r.national_id).collect();
  national_ids.sort();
  national_ids.dedup();
  let mut peers: BTreeMap<DemographicId, Demographic> = BTreeMap::new();
  for d in find_by_national_ids(store, &national_ids, config.id_chunk_size()).await? {
    if !by_id.contains_key(&d.id) {
      peers.entry(d.id).or_insert(d);
    }
  }

  Ok(MatchOutcome {
    primary_matched,
    fallback_matched,
    skipped_all_zero_badge: fallback.all_pairs_zero_badge,
    existing: by_id.into_values().collect(),
    peers: peers.into_values().collect(),
  })
}

// ─── Pairing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
  ExternalId,
  Fallback,
}

/// A stored record and the incoming record it reconciles against.
#[derive(Debug, Clone, Copy)]
pub struct Pairing<'a> {
  pub stored:   &'a Demographic,
  pub incoming: &'a IncomingRecord,
  pub kind:     MatchKind,
}

/// Pair each stored record with at most one incoming record, and each
/// incoming record with at most one stored record.
///
/// A stored record whose external id appears in `incoming` pairs with that
/// record. Any other stored record pairs with the first incoming record, in
/// batch order, that carries the same assigned `(national id, badge)` and
/// whose own external id is unknown to the store.
pub fn pair<'a>(existing: &'a [Demographic], incoming: &'a [IncomingRecord]) -> Vec<Pairing<'a>> {
  let by_external_id: HashMap<ExternalId, &IncomingRecord> =
    incoming.iter().map(|r| (r.external_id, r)).collect();
  let known: HashSet<ExternalId> = existing.iter().filter_map(|d| d.external_id).collect();

  let mut used: HashSet<ExternalId> = HashSet::new();
  let mut pairings = Vec::new();
  let mut unpaired = Vec::new();

  for stored in existing {
    match stored.external_id.and_then(|id| by_external_id.get(&id).copied()) {
      Some(record) => {
        used.insert(record.external_id);
        pairings.push(Pairing { stored, incoming: record, kind: MatchKind::ExternalId });
      }
      None => unpaired.push(stored),
    }
  }

  for stored in unpaired {
    let Some(key) = stored.match_pair() else { continue };
    let candidate = incoming.iter().find(|r| {
      r.match_pair() == Some(key) && !known.contains(&r.external_id) && !used.contains(&r.external_id)
    });
    if let Some(record) = candidate {
      used.insert(record.external_id);
      pairings.push(Pairing { stored, incoming: record, kind: MatchKind::Fallback });
    }
  }

  pairings.sort_by_key(|p| p.stored.id);
  pairings
}

/// Incoming records that matched neither path: their external id is not held
/// by any matched stored record, and their badge is unassigned or their pair
/// is not held by any matched stored record.
pub fn identify_new(incoming: &[IncomingRecord], existing: &[Demographic]) -> Vec<IncomingRecord> {
  let external_ids: HashSet<ExternalId> = existing.iter().filter_map(|d| d.external_id).collect();
  let pairs: HashSet<(NationalId, BadgeNumber)> =
    existing.iter().filter_map(|d| d.match_pair()).collect();

  incoming
    .iter()
    .filter(|r| {
      !external_ids.contains(&r.external_id)
        && r.match_pair().is_none_or(|key| !pairs.contains(&key))
    })
    .cloned()
    .collect()
}
