#![forbid(unsafe_code)]

use facegate_kernel_contracts::access::{
    is_allowed_cycle_transition, AccessDecision, AccessFailure, AccessFailureKind,
    ActuationCommand, CycleId, DecisionCycleState,
};
use facegate_kernel_contracts::device::{DeviceLocation, DeviceMac};
use facegate_kernel_contracts::history::{RequesterIp, TrustScore, TRUST_MAX};
use facegate_kernel_contracts::identity::IdentityId;
use facegate_kernel_contracts::{ContractViolation, MonotonicTimeNs, ReasonCodeId, Validate};

use crate::face_match::similarity_percent;

pub mod reason_codes {
    use facegate_kernel_contracts::ReasonCodeId;

    // Access decision reason-code namespace ("FG").
    pub const ACCESS_ALLOWED: ReasonCodeId = ReasonCodeId(0x4647_0001);
    pub const ACCESS_DENIED_LOW_TRUST: ReasonCodeId = ReasonCodeId(0x4647_0002);
    pub const ACCESS_DENIED_NO_MATCH: ReasonCodeId = ReasonCodeId(0x4647_0003);

    pub const ACCESS_MALFORMED_OBSERVATION: ReasonCodeId = ReasonCodeId(0x4647_00F1);
    pub const ACCESS_STORE_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4647_00F2);
    pub const ACCESS_UNKNOWN_DEVICE: ReasonCodeId = ReasonCodeId(0x4647_00F3);
    pub const ACCESS_ACTUATION_TIMEOUT: ReasonCodeId = ReasonCodeId(0x4647_00F4);
    pub const ACCESS_ACTUATION_FAILED: ReasonCodeId = ReasonCodeId(0x4647_00F5);
    pub const ACCESS_LEDGER_REJECTED: ReasonCodeId = ReasonCodeId(0x4647_00F6);
    pub const ACCESS_LEDGER_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4647_00F7);
    pub const ACCESS_INTERNAL_PIPELINE_ERROR: ReasonCodeId = ReasonCodeId(0x4647_00FF);
}

pub fn reason_code_for(kind: AccessFailureKind) -> ReasonCodeId {
    match kind {
        AccessFailureKind::MalformedObservation => reason_codes::ACCESS_MALFORMED_OBSERVATION,
        AccessFailureKind::StoreUnavailable => reason_codes::ACCESS_STORE_UNAVAILABLE,
        AccessFailureKind::UnknownDevice => reason_codes::ACCESS_UNKNOWN_DEVICE,
        AccessFailureKind::ActuationTimeout => reason_codes::ACCESS_ACTUATION_TIMEOUT,
        AccessFailureKind::ActuationFailed => reason_codes::ACCESS_ACTUATION_FAILED,
        AccessFailureKind::LedgerRejected => reason_codes::ACCESS_LEDGER_REJECTED,
        AccessFailureKind::LedgerUnavailable => reason_codes::ACCESS_LEDGER_UNAVAILABLE,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterPolicy {
    pub allow_threshold: u8,
    pub unlock_validity_ms: u64,
}

impl ArbiterPolicy {
    pub fn mvp_v1() -> Self {
        Self {
            allow_threshold: 70,
            unlock_validity_ms: 5_000,
        }
    }
}

impl Validate for ArbiterPolicy {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.allow_threshold == 0 || self.allow_threshold > TRUST_MAX {
            return Err(ContractViolation::InvalidValue {
                field: "arbiter_policy.allow_threshold",
                reason: "must be within 1..=100",
            });
        }
        if self.unlock_validity_ms == 0 || self.unlock_validity_ms > 60_000 {
            return Err(ContractViolation::InvalidValue {
                field: "arbiter_policy.unlock_validity_ms",
                reason: "must be within 1..=60000",
            });
        }
        Ok(())
    }
}

/// Allow iff trust meets the threshold and a candidate exists.
pub fn decide(policy: &ArbiterPolicy, trust: TrustScore, candidate: Option<&IdentityId>) -> AccessDecision {
    if candidate.is_some() && trust.value() >= policy.allow_threshold {
        AccessDecision::Allow
    } else {
        AccessDecision::Deny
    }
}

pub fn decision_reason_code(decision: AccessDecision, candidate: Option<&IdentityId>) -> ReasonCodeId {
    match (decision, candidate) {
        (AccessDecision::Allow, _) => reason_codes::ACCESS_ALLOWED,
        (AccessDecision::Deny, None) => reason_codes::ACCESS_DENIED_NO_MATCH,
        (AccessDecision::Deny, Some(_)) => reason_codes::ACCESS_DENIED_LOW_TRUST,
    }
}

pub fn unlock_command(
    policy: &ArbiterPolicy,
    cycle_id: CycleId,
    device_mac: DeviceMac,
    requester_ip: RequesterIp,
    now: MonotonicTimeNs,
) -> Result<ActuationCommand, ContractViolation> {
    ActuationCommand::unlock_v1(
        cycle_id,
        device_mac,
        requester_ip,
        policy.unlock_validity_ms,
        now,
    )
}

/// Per-cycle state machine. Every state change goes through the transition
/// allow-list; the visited states are kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCycle {
    cycle_id: CycleId,
    state: DecisionCycleState,
    trace: Vec<DecisionCycleState>,
    failure: Option<AccessFailure>,
}

impl DecisionCycle {
    pub fn start(cycle_id: CycleId) -> Self {
        Self {
            cycle_id,
            state: DecisionCycleState::Received,
            trace: vec![DecisionCycleState::Received],
            failure: None,
        }
    }

    pub fn cycle_id(&self) -> CycleId {
        self.cycle_id
    }

    pub fn state(&self) -> DecisionCycleState {
        self.state
    }

    pub fn trace(&self) -> &[DecisionCycleState] {
        &self.trace
    }

    pub fn failure(&self) -> Option<&AccessFailure> {
        self.failure.as_ref()
    }

    pub fn advance(&mut self, to: DecisionCycleState) -> Result<(), ContractViolation> {
        if to == DecisionCycleState::Failed {
            return Err(ContractViolation::InvalidValue {
                field: "decision_cycle.state",
                reason: "use fail() to enter Failed",
            });
        }
        if !is_allowed_cycle_transition(self.state, to) {
            return Err(ContractViolation::InvalidValue {
                field: "decision_cycle.state",
                reason: "transition not allowed",
            });
        }
        self.state = to;
        self.trace.push(to);
        Ok(())
    }

    pub fn fail(
        &mut self,
        kind: AccessFailureKind,
        detail: impl Into<String>,
    ) -> Result<AccessFailure, ContractViolation> {
        if !is_allowed_cycle_transition(self.state, DecisionCycleState::Failed) {
            return Err(ContractViolation::InvalidValue {
                field: "decision_cycle.state",
                reason: "terminal cycle cannot fail",
            });
        }
        let failure = AccessFailure::new(kind, reason_code_for(kind), detail);
        self.state = DecisionCycleState::Failed;
        self.trace.push(DecisionCycleState::Failed);
        self.failure = Some(failure.clone());
        Ok(failure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryLogFlags {
    pub degraded: bool,
    pub actuation_timeout: bool,
    pub actuation_failed: bool,
}

/// Free-text `log` column for one decision.
pub fn history_log_text(
    decision: AccessDecision,
    alias: Option<&str>,
    location: &DeviceLocation,
    distance: Option<f64>,
    trust: TrustScore,
    flags: HistoryLogFlags,
) -> String {
    let mut line = match (decision, alias) {
        (AccessDecision::Allow, Some(alias)) => {
            format!("Usuario {alias} entrou em {} !", location.as_str())
        }
        (AccessDecision::Deny, Some(alias)) => {
            format!("Usuario {alias} negado em {} !", location.as_str())
        }
        (_, None) => format!("Rosto nao reconhecido em {} !", location.as_str()),
    };
    if let Some(d) = distance {
        line.push_str(&format!(" similaridade={:.2}%", similarity_percent(d)));
    }
    line.push_str(&format!(" trust={}", trust.value()));
    if flags.degraded {
        line.push_str(" [degraded]");
    }
    if flags.actuation_timeout {
        line.push_str(" [actuation_timeout]");
    }
    if flags.actuation_failed {
        line.push_str(" [actuation_failed]");
    }
    line
}
