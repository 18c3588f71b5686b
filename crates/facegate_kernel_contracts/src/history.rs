#![forbid(unsafe_code)]

use std::net::Ipv4Addr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::device::{DeviceLocation, DeviceMac};
use crate::identity::{EmailAddress, IdentityId, IdentityRecord, PermissionLevel};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const HISTORY_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Logged when the requesting device did not report its address.
pub const UNKNOWN_REQUESTER_IP: &str = "0.0.0.1";

pub const TRUST_MAX: u8 = 100;
pub const HISTORY_LOG_MAX_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterIp(String);

impl RequesterIp {
    pub fn new(ip: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(ip.into());
        v.validate()?;
        Ok(v)
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_REQUESTER_IP.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for RequesterIp {
    fn validate(&self) -> Result<(), ContractViolation> {
        // std accepts only the strict dotted-quad form (no leading zeros, four octets).
        if self.0.parse::<Ipv4Addr>().is_err() {
            return Err(ContractViolation::InvalidValue {
                field: "requester_ip",
                reason: "must be an IPv4 dotted-quad literal",
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for RequesterIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TrustScore(u8);

impl TrustScore {
    pub const ZERO: TrustScore = TrustScore(0);

    pub fn new(v: u8) -> Result<Self, ContractViolation> {
        if v > TRUST_MAX {
            return Err(ContractViolation::InvalidRange {
                field: "trust",
                min: 0.0,
                max: TRUST_MAX as f64,
                got: v as f64,
            });
        }
        Ok(Self(v))
    }

    /// Clamps an intermediate signed score into [0, 100].
    pub fn clamped(v: i32) -> Self {
        Self(v.clamp(0, TRUST_MAX as i32) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct HistoryRowId(pub u64);

/// Identity columns copied into a history row at decision time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub id: IdentityId,
    pub nome: String,
    pub alias: String,
    pub email: EmailAddress,
    pub matricula: Option<String>,
    pub permission_level: PermissionLevel,
}

impl IdentitySnapshot {
    pub fn from_record(r: &IdentityRecord) -> Self {
        Self {
            id: r.id.clone(),
            nome: r.nome.clone(),
            alias: r.alias.clone(),
            email: r.email.clone(),
            matricula: r.matricula.clone(),
            permission_level: r.permission_level,
        }
    }
}

/// Unvalidated row as produced by a decision cycle. The ledger is the gate:
/// trust range and IP syntax are checked on append, not at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecordInput {
    pub schema_version: SchemaVersion,
    pub identity: Option<IdentitySnapshot>,
    pub mac: Option<DeviceMac>,
    pub local: Option<DeviceLocation>,
    pub ip: String,
    pub trust: u8,
    pub data_acesso: NaiveDate,
    pub horario_acesso: NaiveTime,
    pub log: String,
}

impl HistoryRecordInput {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        identity: Option<IdentitySnapshot>,
        mac: Option<DeviceMac>,
        local: Option<DeviceLocation>,
        ip: String,
        trust: u8,
        data_acesso: NaiveDate,
        horario_acesso: NaiveTime,
        log: String,
    ) -> Self {
        Self {
            schema_version: HISTORY_CONTRACT_VERSION,
            identity,
            mac,
            local,
            ip,
            trust,
            data_acesso,
            horario_acesso,
            log,
        }
    }
}

impl Validate for HistoryRecordInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != HISTORY_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "history_record_input.schema_version",
                reason: "must match HISTORY_CONTRACT_VERSION",
            });
        }
        TrustScore::new(self.trust)?;
        RequesterIp::new(self.ip.clone())?;
        validate_text("history_record_input.log", &self.log, HISTORY_LOG_MAX_LEN)?;
        if let Some(identity) = &self.identity {
            identity.id.validate()?;
            identity.email.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub schema_version: SchemaVersion,
    pub row_id: HistoryRowId,
    pub identity: Option<IdentitySnapshot>,
    pub mac: Option<DeviceMac>,
    pub local: Option<DeviceLocation>,
    pub ip: RequesterIp,
    pub trust: TrustScore,
    pub data_acesso: NaiveDate,
    pub horario_acesso: NaiveTime,
    pub log: String,
}

impl HistoryRecord {
    pub fn from_input(
        row_id: HistoryRowId,
        input: HistoryRecordInput,
    ) -> Result<Self, ContractViolation> {
        input.validate()?;
        Ok(Self {
            schema_version: HISTORY_CONTRACT_VERSION,
            row_id,
            identity: input.identity,
            mac: input.mac,
            local: input.local,
            ip: RequesterIp::new(input.ip)?,
            trust: TrustScore::new(input.trust)?,
            data_acesso: input.data_acesso,
            horario_acesso: input.horario_acesso,
            log: input.log,
        })
    }

    pub fn identity_id(&self) -> Option<&IdentityId> {
        self.identity.as_ref().map(|i| &i.id)
    }
}
