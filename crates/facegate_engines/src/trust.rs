#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use facegate_kernel_contracts::access::AccessDecision;
use facegate_kernel_contracts::device::{DeviceClass, DeviceLocation};
use facegate_kernel_contracts::face_match::FaceMatchResult;
use facegate_kernel_contracts::history::{TrustScore, TRUST_MAX};
use facegate_kernel_contracts::{ContractViolation, MonotonicTimeNs, Validate};

#[derive(Debug, Clone, PartialEq)]
pub struct TrustScoringConfig {
    /// Distance at which the base score reaches 0.
    pub distance_scale: f64,
    pub history_depth: u8,
    pub damping_window_ms: u64,
    pub consecutive_denial_threshold: u8,
    pub consecutive_denial_penalty: u8,
    pub untrusted_location_penalty: u8,
    /// Empty list disables the location penalty.
    pub trusted_locations: BTreeSet<String>,
}

impl TrustScoringConfig {
    pub fn mvp_v1() -> Self {
        Self {
            distance_scale: 1.0,
            history_depth: 10,
            damping_window_ms: 5 * 60 * 1_000,
            consecutive_denial_threshold: 5,
            consecutive_denial_penalty: 30,
            untrusted_location_penalty: 20,
            trusted_locations: BTreeSet::new(),
        }
    }

    pub fn classify(&self, location: &DeviceLocation) -> DeviceClass {
        if self.trusted_locations.is_empty() || self.trusted_locations.contains(location.as_str()) {
            DeviceClass::Trusted
        } else {
            DeviceClass::Untrusted
        }
    }
}

impl Validate for TrustScoringConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.distance_scale.is_finite() || self.distance_scale <= 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "trust_scoring_config.distance_scale",
                reason: "must be finite and > 0",
            });
        }
        if self.history_depth == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "trust_scoring_config.history_depth",
                reason: "must be > 0",
            });
        }
        if self.consecutive_denial_threshold == 0
            || self.consecutive_denial_threshold > self.history_depth
        {
            return Err(ContractViolation::InvalidValue {
                field: "trust_scoring_config.consecutive_denial_threshold",
                reason: "must be within 1..=history_depth",
            });
        }
        if self.consecutive_denial_penalty > TRUST_MAX || self.untrusted_location_penalty > TRUST_MAX
        {
            return Err(ContractViolation::InvalidValue {
                field: "trust_scoring_config.penalty",
                reason: "must be <= 100",
            });
        }
        if self.damping_window_ms == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "trust_scoring_config.damping_window_ms",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// One past decision on a device, as kept by its session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentOutcome {
    pub at: MonotonicTimeNs,
    pub decision: AccessDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustAssessment {
    pub trust: TrustScore,
    pub base: u8,
    pub denial_penalty: u8,
    pub location_penalty: u8,
    pub consecutive_denials: u32,
    pub device_class: DeviceClass,
    /// Device history could not be read; only the base score was applied.
    pub degraded: bool,
}

pub fn base_trust_from_distance(distance: f64, scale: f64) -> u8 {
    if !distance.is_finite() || scale <= 0.0 {
        return 0;
    }
    let ratio = (distance / scale).clamp(0.0, 1.0);
    ((1.0 - ratio) * TRUST_MAX as f64).round() as u8
}

/// Counts denials at the head of `recent` (most recent first) that fall
/// inside the damping window ending at `now`.
pub fn consecutive_recent_denials(
    recent: &[RecentOutcome],
    now: MonotonicTimeNs,
    window_ms: u64,
) -> u32 {
    let window_ns = window_ms.saturating_mul(1_000_000);
    recent
        .iter()
        .take_while(|o| {
            o.decision == AccessDecision::Deny && now.saturating_elapsed_since(o.at) <= window_ns
        })
        .count() as u32
}

pub fn score_trust(
    config: &TrustScoringConfig,
    matched: &FaceMatchResult,
    location: &DeviceLocation,
    recent: Option<&[RecentOutcome]>,
    now: MonotonicTimeNs,
) -> TrustAssessment {
    let device_class = config.classify(location);
    let degraded = recent.is_none();

    let distance = match (&matched.candidate, matched.distance()) {
        (Some(_), Some(d)) => d,
        _ => {
            return TrustAssessment {
                trust: TrustScore::ZERO,
                base: 0,
                denial_penalty: 0,
                location_penalty: 0,
                consecutive_denials: 0,
                device_class,
                degraded,
            }
        }
    };

    let base = base_trust_from_distance(distance, config.distance_scale);

    let consecutive_denials = recent
        .map(|r| {
            let depth = config.history_depth as usize;
            consecutive_recent_denials(&r[..r.len().min(depth)], now, config.damping_window_ms)
        })
        .unwrap_or(0);
    let denial_penalty = if consecutive_denials >= config.consecutive_denial_threshold as u32 {
        config.consecutive_denial_penalty
    } else {
        0
    };
    // Without device history the score falls back to the base alone.
    let location_penalty = match device_class {
        _ if degraded => 0,
        DeviceClass::Trusted => 0,
        DeviceClass::Untrusted => config.untrusted_location_penalty,
    };

    let trust = TrustScore::clamped(base as i32 - denial_penalty as i32 - location_penalty as i32);
    TrustAssessment {
        trust,
        base,
        denial_penalty,
        location_penalty,
        consecutive_denials,
        device_class,
        degraded,
    }
}
