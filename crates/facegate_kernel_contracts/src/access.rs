#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::device::DeviceMac;
use crate::history::{HistoryRowId, RequesterIp, TrustScore};
use crate::identity::IdentityId;
use crate::{ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate};

pub const ACCESS_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CycleId(pub u64);

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound observation from a camera device. The encoding is carried raw; its
/// shape is checked by the matcher, the requester address by `validate`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecisionRequest {
    pub schema_version: SchemaVersion,
    pub device_mac: DeviceMac,
    pub observed_encoding: Vec<f64>,
    pub requester_ip: Option<String>,
}

impl AccessDecisionRequest {
    pub fn v1(
        device_mac: DeviceMac,
        observed_encoding: Vec<f64>,
        requester_ip: Option<String>,
    ) -> Self {
        Self {
            schema_version: ACCESS_CONTRACT_VERSION,
            device_mac,
            observed_encoding,
            requester_ip,
        }
    }

    /// Address to log and to actuate against; absent addresses map to the sentinel.
    pub fn requester_ip(&self) -> Result<RequesterIp, ContractViolation> {
        match self.requester_ip.as_deref().map(str::trim) {
            None | Some("") => Ok(RequesterIp::unknown()),
            Some(ip) => RequesterIp::new(ip),
        }
    }
}

impl Validate for AccessDecisionRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ACCESS_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "access_decision_request.schema_version",
                reason: "must match ACCESS_CONTRACT_VERSION",
            });
        }
        self.device_mac.validate()?;
        self.requester_ip().map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessDecision::Allow => "allow",
            AccessDecision::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionCycleState {
    Received,
    Matched,
    Scored,
    Decided,
    Actuated,
    Logged,
    Failed,
}

impl DecisionCycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DecisionCycleState::Logged | DecisionCycleState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionCycleState::Received => "received",
            DecisionCycleState::Matched => "matched",
            DecisionCycleState::Scored => "scored",
            DecisionCycleState::Decided => "decided",
            DecisionCycleState::Actuated => "actuated",
            DecisionCycleState::Logged => "logged",
            DecisionCycleState::Failed => "failed",
        }
    }
}

/// Deny skips `Actuated` and goes straight from `Decided` to `Logged`.
pub fn is_allowed_cycle_transition(from: DecisionCycleState, to: DecisionCycleState) -> bool {
    use DecisionCycleState::*;
    if to == Failed {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (Received, Matched)
            | (Matched, Scored)
            | (Scored, Decided)
            | (Decided, Actuated)
            | (Decided, Logged)
            | (Actuated, Logged)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessFailureKind {
    MalformedObservation,
    StoreUnavailable,
    UnknownDevice,
    ActuationTimeout,
    ActuationFailed,
    LedgerRejected,
    LedgerUnavailable,
}

impl AccessFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessFailureKind::MalformedObservation => "malformed_observation",
            AccessFailureKind::StoreUnavailable => "store_unavailable",
            AccessFailureKind::UnknownDevice => "unknown_device",
            AccessFailureKind::ActuationTimeout => "actuation_timeout",
            AccessFailureKind::ActuationFailed => "actuation_failed",
            AccessFailureKind::LedgerRejected => "ledger_rejected",
            AccessFailureKind::LedgerUnavailable => "ledger_unavailable",
        }
    }

    /// Failures that indicate an operational fault rather than a user error.
    pub fn raises_operational_alert(self) -> bool {
        matches!(
            self,
            AccessFailureKind::StoreUnavailable
                | AccessFailureKind::LedgerRejected
                | AccessFailureKind::LedgerUnavailable
        )
    }

    /// Actuation failures are recorded on a logged cycle; the rest end it.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            AccessFailureKind::ActuationTimeout | AccessFailureKind::ActuationFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessFailure {
    pub kind: AccessFailureKind,
    pub reason_code: ReasonCodeId,
    pub detail: String,
}

impl AccessFailure {
    pub fn new(kind: AccessFailureKind, reason_code: ReasonCodeId, detail: impl Into<String>) -> Self {
        Self {
            kind,
            reason_code,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuationAction {
    Unlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuationCommand {
    pub schema_version: SchemaVersion,
    pub cycle_id: CycleId,
    pub device_mac: DeviceMac,
    pub requester_ip: RequesterIp,
    pub action: ActuationAction,
    pub validity_window_ms: u64,
    pub issued_at: MonotonicTimeNs,
}

impl ActuationCommand {
    pub fn unlock_v1(
        cycle_id: CycleId,
        device_mac: DeviceMac,
        requester_ip: RequesterIp,
        validity_window_ms: u64,
        issued_at: MonotonicTimeNs,
    ) -> Result<Self, ContractViolation> {
        let c = Self {
            schema_version: ACCESS_CONTRACT_VERSION,
            cycle_id,
            device_mac,
            requester_ip,
            action: ActuationAction::Unlock,
            validity_window_ms,
            issued_at,
        };
        c.validate()?;
        Ok(c)
    }

    pub fn expires_at(&self) -> MonotonicTimeNs {
        MonotonicTimeNs(
            self.issued_at
                .0
                .saturating_add(self.validity_window_ms.saturating_mul(1_000_000)),
        )
    }
}

impl Validate for ActuationCommand {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.validity_window_ms == 0 || self.validity_window_ms > 60_000 {
            return Err(ContractViolation::InvalidValue {
                field: "actuation_command.validity_window_ms",
                reason: "must be within 1..=60000",
            });
        }
        self.device_mac.validate()?;
        self.requester_ip.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuationStatus {
    NotRequested,
    Acknowledged,
    TimedOut,
    Failed,
}

impl ActuationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActuationStatus::NotRequested => "not_requested",
            ActuationStatus::Acknowledged => "acknowledged",
            ActuationStatus::TimedOut => "timed_out",
            ActuationStatus::Failed => "failed",
        }
    }
}

/// Single observable outcome of one decision cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecisionResult {
    pub schema_version: SchemaVersion,
    pub cycle_id: CycleId,
    pub device_mac: DeviceMac,
    pub decision: AccessDecision,
    pub trust: TrustScore,
    pub matched_identity: Option<IdentityId>,
    pub distance: Option<f64>,
    pub final_state: DecisionCycleState,
    pub failure: Option<AccessFailure>,
    pub actuation: ActuationStatus,
    pub degraded: bool,
    pub history_row_id: Option<HistoryRowId>,
}

impl AccessDecisionResult {
    pub fn is_allowed(&self) -> bool {
        self.decision == AccessDecision::Allow
    }
}

impl Validate for AccessDecisionResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.final_state.is_terminal() {
            return Err(ContractViolation::InvalidValue {
                field: "access_decision_result.final_state",
                reason: "must be logged or failed",
            });
        }
        if self.final_state == DecisionCycleState::Failed && self.failure.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "access_decision_result.failure",
                reason: "failed cycle must carry a failure",
            });
        }
        if self.final_state == DecisionCycleState::Logged && self.history_row_id.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "access_decision_result.history_row_id",
                reason: "logged cycle must reference its history row",
            });
        }
        if self.decision == AccessDecision::Allow && self.matched_identity.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "access_decision_result.decision",
                reason: "allow requires a matched identity",
            });
        }
        if self.matched_identity.is_none() && self.trust != TrustScore::ZERO {
            return Err(ContractViolation::InvalidValue {
                field: "access_decision_result.trust",
                reason: "no-match must carry trust 0",
            });
        }
        Ok(())
    }
}
