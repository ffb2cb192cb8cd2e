//! k-anonymity: generalization, equivalence classes, bounded suppression
//!
//! Records are generalized before grouping: identifiers become salted
//! Keccak-256 surrogates (stable per salt, bijective in practice, so zero
//! information loss), timestamps collapse into fixed-width windows. When
//! sub-k leftovers would push the suppression rate over the ceiling, the
//! quasi-identifier with the most distinct values is coarsened first and
//! grouping retries, up to each identifier's top level.

use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

use sift_core::Event;

use crate::error::AnonymityError;

/// Generalized view of one event, the unit of k-anonymity processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonRecord {
    pub user: u64,
    pub document: u64,
    /// Fixed-width time window index
    pub window: u32,
    pub action: u16,
    pub template: u32,
}

/// Attributes that can re-identify in combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuasiIdentifier {
    User,
    Document,
    TimeWindow,
    Template,
}

impl QuasiIdentifier {
    /// Top generalization level; at the top the field is dropped entirely.
    fn max_level(self) -> u8 {
        match self {
            QuasiIdentifier::TimeWindow => 6,
            _ => 1,
        }
    }
}

/// Sentinel for a dropped quasi-identifier value
const DROPPED: u64 = u64::MAX;

/// Maps raw identifiers and timestamps to consistent generalized values.
/// Same salt + same input always yields the same surrogate.
#[derive(Debug, Clone)]
pub struct Generalizer {
    salt: [u8; 32],
    window_secs: u32,
}

impl Generalizer {
    pub fn new(salt: [u8; 32], window_secs: u32) -> Self {
        assert!(window_secs > 0, "window width must be positive");
        Self { salt, window_secs }
    }

    /// Keyed surrogate: first 8 bytes of Keccak-256(salt || id).
    pub fn surrogate(&self, id: u64) -> u64 {
        let mut hasher = Keccak::v256();
        hasher.update(&self.salt);
        hasher.update(&id.to_le_bytes());
        let mut out = [0u8; 32];
        hasher.finalize(&mut out);
        u64::from_le_bytes(out[0..8].try_into().expect("hash is 32 bytes"))
    }

    pub fn window(&self, timestamp: u32) -> u32 {
        timestamp / self.window_secs
    }

    pub fn generalize(&self, event: &Event) -> AnonRecord {
        AnonRecord {
            user: self.surrogate(event.user_id),
            document: self.surrogate(event.document_id),
            window: self.window(event.timestamp),
            action: event.action,
            template: event.template_id,
        }
    }
}

/// A group of records indistinguishable on the active quasi-identifiers.
/// `records` holds indices into the input slice, so set algebra against the
/// input is exact.
#[derive(Debug, Clone)]
pub struct EquivalenceClass {
    /// Generalized value per quasi-identifier, in the order they were named
    pub key: Vec<u64>,
    pub records: Vec<usize>,
}

fn value_at(record: &AnonRecord, qi: QuasiIdentifier, level: u8) -> u64 {
    if level >= qi.max_level() {
        return DROPPED;
    }
    match qi {
        QuasiIdentifier::User => record.user,
        QuasiIdentifier::Document => record.document,
        // Each level doubles the window width
        QuasiIdentifier::TimeWindow => (record.window >> level) as u64,
        QuasiIdentifier::Template => record.template as u64,
    }
}

fn group_at_levels(
    records: &[AnonRecord],
    k: usize,
    quasi: &[QuasiIdentifier],
    levels: &[u8],
) -> (Vec<EquivalenceClass>, Vec<usize>) {
    use std::collections::HashMap;

    let mut groups: HashMap<Vec<u64>, Vec<usize>> = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        let key: Vec<u64> = quasi
            .iter()
            .zip(levels)
            .map(|(&qi, &level)| value_at(record, qi, level))
            .collect();
        groups.entry(key).or_default().push(idx);
    }

    let mut classes = Vec::new();
    let mut leftover = Vec::new();
    for (key, members) in groups {
        if members.len() >= k {
            classes.push(EquivalenceClass { key, records: members });
        } else {
            leftover.extend(members);
        }
    }
    // Deterministic output order regardless of hash-map iteration
    classes.sort_by(|a, b| a.key.cmp(&b.key));
    leftover.sort_unstable();
    (classes, leftover)
}

/// Group records sharing identical generalized values on the named
/// quasi-identifiers. Every returned class has `len >= k`; records that
/// fell into smaller groups come back as the leftover set. Union of class
/// members and leftovers is exactly the input index set.
pub fn form_equivalence_classes(
    records: &[AnonRecord],
    k: usize,
    quasi: &[QuasiIdentifier],
) -> Result<(Vec<EquivalenceClass>, Vec<usize>), AnonymityError> {
    if k == 0 {
        return Err(AnonymityError::InvalidK);
    }
    if quasi.is_empty() {
        return Err(AnonymityError::NoQuasiIdentifiers);
    }
    Ok(group_at_levels(records, k, quasi, &vec![0; quasi.len()]))
}

/// Result of suppression with coarsening.
#[derive(Debug, Clone)]
pub struct SuppressionOutcome {
    pub classes: Vec<EquivalenceClass>,
    /// Indices of suppressed (securely dropped, never published) records
    pub suppressed: Vec<usize>,
    /// Final generalization level per quasi-identifier
    pub levels: Vec<u8>,
    /// Coarsening rounds taken
    pub rounds: usize,
    /// Measured information loss in [0, 1]
    pub info_loss: f64,
}

/// Suppress sub-k leftovers while the suppression rate stays at or below
/// the ceiling; otherwise coarsen the quasi-identifier with the highest
/// distinct-value count and re-group. Fails rather than publish a
/// non-compliant or over-suppressed result.
pub fn apply_suppression(
    records: &[AnonRecord],
    k: usize,
    quasi: &[QuasiIdentifier],
    ceiling: f64,
) -> Result<SuppressionOutcome, AnonymityError> {
    if k == 0 {
        return Err(AnonymityError::InvalidK);
    }
    if quasi.is_empty() {
        return Err(AnonymityError::NoQuasiIdentifiers);
    }

    let mut levels = vec![0u8; quasi.len()];
    let mut rounds = 0usize;

    loop {
        let (classes, leftover) = group_at_levels(records, k, quasi, &levels);
        let rate = if records.is_empty() {
            0.0
        } else {
            leftover.len() as f64 / records.len() as f64
        };

        if rate <= ceiling {
            let info_loss = information_loss(records.len(), leftover.len(), quasi, &levels);
            return Ok(SuppressionOutcome {
                classes,
                suppressed: leftover,
                levels,
                rounds,
                info_loss,
            });
        }

        // Coarsen the identifier that fragments the grouping the most:
        // highest distinct-value count at its current level.
        let candidate = quasi
            .iter()
            .enumerate()
            .filter(|(i, qi)| levels[*i] < qi.max_level())
            .max_by_key(|(i, &qi)| {
                let mut values: Vec<u64> = records
                    .iter()
                    .map(|r| value_at(r, qi, levels[*i]))
                    .collect();
                values.sort_unstable();
                values.dedup();
                values.len()
            });

        match candidate {
            Some((i, _)) => {
                levels[i] += 1;
                rounds += 1;
                tracing::debug!(
                    qi = ?quasi[i],
                    level = levels[i],
                    suppression_rate = rate,
                    "coarsening quasi-identifier"
                );
            }
            None => {
                return Err(AnonymityError::SuppressionCeiling {
                    rate,
                    ceiling,
                    rounds,
                });
            }
        }
    }
}

/// Pure compliance check: every class must have at least k members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KAnonymityReport {
    pub is_compliant: bool,
    /// Indices (into the checked slice) of classes below k
    pub violating_groups: Vec<usize>,
}

pub fn validate_k_anonymity(classes: &[EquivalenceClass], k: usize) -> KAnonymityReport {
    let violating_groups: Vec<usize> = classes
        .iter()
        .enumerate()
        .filter(|(_, class)| class.records.len() < k)
        .map(|(i, _)| i)
        .collect();
    KAnonymityReport {
        is_compliant: violating_groups.is_empty(),
        violating_groups,
    }
}

/// Weighted distortion in [0, 1]: a suppressed record costs 1, a kept
/// record the mean of its per-identifier losses (surrogates are bijective
/// and cost 0 at level 0; a window widened L levels costs 1 - 2^-L; a
/// dropped field costs 1).
pub fn information_loss(
    total: usize,
    suppressed: usize,
    quasi: &[QuasiIdentifier],
    levels: &[u8],
) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let per_field: f64 = quasi
        .iter()
        .zip(levels)
        .map(|(&qi, &level)| {
            if level >= qi.max_level() {
                1.0
            } else {
                1.0 - 0.5_f64.powi(level as i32)
            }
        })
        .sum::<f64>()
        / quasi.len() as f64;

    let kept = (total - suppressed) as f64;
    (suppressed as f64 + kept * per_field) / total as f64
}
