#![forbid(unsafe_code)]

use sha2::{Digest, Sha256};

use facegate_kernel_contracts::face_match::{EnrolledFace, FaceMatchResult, NearestFace};
use facegate_kernel_contracts::identity::FACE_ENCODING_DIM;
use facegate_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatchConfig {
    /// Euclidean distance above which the nearest entry is not accepted as a candidate.
    pub rejection_ceiling: f64,
    pub tie_epsilon: f64,
}

impl FaceMatchConfig {
    pub fn mvp_v1() -> Self {
        Self {
            rejection_ceiling: 0.6,
            tie_epsilon: 1e-9,
        }
    }
}

impl Validate for FaceMatchConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.rejection_ceiling.is_finite() || self.rejection_ceiling <= 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "face_match_config.rejection_ceiling",
                reason: "must be finite and > 0",
            });
        }
        if !self.tie_epsilon.is_finite() || self.tie_epsilon < 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "face_match_config.tie_epsilon",
                reason: "must be finite and >= 0",
            });
        }
        Ok(())
    }
}

/// Immutable registry view handed to every match. Entries are sorted by
/// identity id so scans and tie-breaks are deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegistrySnapshot {
    generation: u64,
    entries: Vec<EnrolledFace>,
    content_digest: [u8; 32],
}

impl FaceRegistrySnapshot {
    pub fn build(generation: u64, mut entries: Vec<EnrolledFace>) -> Result<Self, ContractViolation> {
        for e in &entries {
            e.validate()?;
        }
        entries.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        if entries
            .windows(2)
            .any(|w| w[0].identity_id == w[1].identity_id)
        {
            return Err(ContractViolation::InvalidValue {
                field: "face_registry_snapshot.entries",
                reason: "identity ids must be unique",
            });
        }
        let content_digest = registry_digest(&entries);
        Ok(Self {
            generation,
            entries,
            content_digest,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn entries(&self) -> &[EnrolledFace] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_digest(&self) -> [u8; 32] {
        self.content_digest
    }

    pub fn content_digest_hex(&self) -> String {
        self.content_digest
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn same_content(&self, other: &FaceRegistrySnapshot) -> bool {
        self.content_digest == other.content_digest
    }
}

fn registry_digest(entries: &[EnrolledFace]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for e in entries {
        hasher.update(e.identity_id.as_str().as_bytes());
        hasher.update(e.permission_level.as_str().as_bytes());
        for v in e.encoding.values() {
            hasher.update(v.to_le_bytes());
        }
    }
    hasher.finalize().into()
}

pub fn validate_observation(observed: &[f64]) -> Result<(), ContractViolation> {
    if observed.len() != FACE_ENCODING_DIM {
        return Err(ContractViolation::InvalidValue {
            field: "observed_encoding",
            reason: "must contain exactly 128 values",
        });
    }
    if observed.iter().any(|v| !v.is_finite()) {
        return Err(ContractViolation::NotFinite {
            field: "observed_encoding",
        });
    }
    Ok(())
}

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Similarity percentage as reported to operators: `(1 - distance) * 100`, floored at 0.
pub fn similarity_percent(distance: f64) -> f64 {
    ((1.0 - distance) * 100.0).max(0.0)
}

/// Nearest-neighbour search over the whole snapshot. Pure; safe to call
/// concurrently against one shared snapshot.
pub fn match_observation(
    config: &FaceMatchConfig,
    snapshot: &FaceRegistrySnapshot,
    observed: &[f64],
) -> Result<FaceMatchResult, ContractViolation> {
    validate_observation(observed)?;

    let distances: Vec<(f64, &EnrolledFace)> = snapshot
        .entries()
        .iter()
        .map(|e| (euclidean_distance(observed, e.encoding.values()), e))
        // A distance that overflows is beyond any ceiling.
        .filter(|(d, _)| d.is_finite())
        .collect();

    let Some(min_distance) = distances.iter().map(|(d, _)| *d).reduce(f64::min) else {
        return FaceMatchResult::v1(None, None, snapshot.generation());
    };

    // Entries are id-ordered, so the first within epsilon of the minimum is the lowest id.
    let nearest = distances
        .iter()
        .find(|(d, _)| *d <= min_distance + config.tie_epsilon)
        .map(|(d, e)| NearestFace {
            identity_id: e.identity_id.clone(),
            permission_level: e.permission_level,
            distance: *d,
        });

    let candidate = nearest
        .as_ref()
        .filter(|n| n.distance <= config.rejection_ceiling)
        .map(|n| n.identity_id.clone());

    FaceMatchResult::v1(nearest, candidate, snapshot.generation())
}
