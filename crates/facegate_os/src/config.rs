#![forbid(unsafe_code)]

use std::time::Duration;

use facegate_engines::access_decision::ArbiterPolicy;
use facegate_engines::face_match::FaceMatchConfig;
use facegate_engines::trust::TrustScoringConfig;
use facegate_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine config: {0}")]
    InvalidConfig(#[from] ContractViolation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSessionConfig {
    pub actuation_timeout_ms: u64,
    /// Bound on waiting for earlier cycles of the same device to finish actuating.
    pub turn_wait_timeout_ms: u64,
    pub recent_outcome_depth: usize,
    pub liveness_window_ms: u64,
}

impl DeviceSessionConfig {
    pub fn mvp_v1() -> Self {
        Self {
            actuation_timeout_ms: 3_000,
            turn_wait_timeout_ms: 10_000,
            recent_outcome_depth: 10,
            liveness_window_ms: 60_000,
        }
    }

    pub fn actuation_timeout(&self) -> Duration {
        Duration::from_millis(self.actuation_timeout_ms)
    }

    pub fn turn_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_wait_timeout_ms)
    }
}

impl Validate for DeviceSessionConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !(1..=60_000).contains(&self.actuation_timeout_ms) {
            return Err(ContractViolation::InvalidValue {
                field: "device_session_config.actuation_timeout_ms",
                reason: "must be within 1..=60000",
            });
        }
        if self.turn_wait_timeout_ms < self.actuation_timeout_ms {
            return Err(ContractViolation::InvalidValue {
                field: "device_session_config.turn_wait_timeout_ms",
                reason: "must be >= actuation_timeout_ms",
            });
        }
        if self.recent_outcome_depth == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "device_session_config.recent_outcome_depth",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessEngineConfig {
    pub face_match: FaceMatchConfig,
    pub trust: TrustScoringConfig,
    pub arbiter: ArbiterPolicy,
    pub devices: DeviceSessionConfig,
    pub ledger_timeout_ms: u64,
    pub registry_refresh_interval_ms: u64,
    pub alert_channel_capacity: usize,
}

impl AccessEngineConfig {
    pub fn mvp_v1() -> Self {
        let trust = TrustScoringConfig::mvp_v1();
        let mut devices = DeviceSessionConfig::mvp_v1();
        devices.recent_outcome_depth = trust.history_depth as usize;
        Self {
            face_match: FaceMatchConfig::mvp_v1(),
            trust,
            arbiter: ArbiterPolicy::mvp_v1(),
            devices,
            ledger_timeout_ms: 3_000,
            registry_refresh_interval_ms: 30_000,
            alert_channel_capacity: 64,
        }
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn registry_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.registry_refresh_interval_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.face_match.validate()?;
        self.trust.validate()?;
        self.arbiter.validate()?;
        self.devices.validate()?;
        if self.devices.recent_outcome_depth < self.trust.history_depth as usize {
            return Err(ContractViolation::InvalidValue {
                field: "access_engine_config.devices.recent_outcome_depth",
                reason: "must hold at least trust.history_depth outcomes",
            }
            .into());
        }
        if !(1..=60_000).contains(&self.ledger_timeout_ms) {
            return Err(ContractViolation::InvalidValue {
                field: "access_engine_config.ledger_timeout_ms",
                reason: "must be within 1..=60000",
            }
            .into());
        }
        if self.registry_refresh_interval_ms < 100 {
            return Err(ContractViolation::InvalidValue {
                field: "access_engine_config.registry_refresh_interval_ms",
                reason: "must be >= 100",
            }
            .into());
        }
        if self.alert_channel_capacity == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "access_engine_config.alert_channel_capacity",
                reason: "must be > 0",
            }
            .into());
        }
        Ok(())
    }
}
