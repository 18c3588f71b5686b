#![forbid(unsafe_code)]

use crate::identity::{FaceEncoding, IdentityId, PermissionLevel};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const FACE_MATCH_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// One registry entry as handed to the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledFace {
    pub identity_id: IdentityId,
    pub encoding: FaceEncoding,
    pub permission_level: PermissionLevel,
}

impl EnrolledFace {
    pub fn v1(
        identity_id: IdentityId,
        encoding: FaceEncoding,
        permission_level: PermissionLevel,
    ) -> Result<Self, ContractViolation> {
        let f = Self {
            identity_id,
            encoding,
            permission_level,
        };
        f.validate()?;
        Ok(f)
    }
}

impl Validate for EnrolledFace {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.identity_id.validate()?;
        self.encoding.validate()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearestFace {
    pub identity_id: IdentityId,
    pub permission_level: PermissionLevel,
    pub distance: f64,
}

/// `nearest` is the globally closest entry; `candidate` is set only when that
/// entry sits at or under the rejection ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatchResult {
    pub schema_version: SchemaVersion,
    pub nearest: Option<NearestFace>,
    pub candidate: Option<IdentityId>,
    pub registry_generation: u64,
}

impl FaceMatchResult {
    pub fn v1(
        nearest: Option<NearestFace>,
        candidate: Option<IdentityId>,
        registry_generation: u64,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: FACE_MATCH_CONTRACT_VERSION,
            nearest,
            candidate,
            registry_generation,
        };
        r.validate()?;
        Ok(r)
    }

    pub fn distance(&self) -> Option<f64> {
        self.nearest.as_ref().map(|n| n.distance)
    }

    pub fn is_no_match(&self) -> bool {
        self.candidate.is_none()
    }

    pub fn candidate_permission(&self) -> Option<PermissionLevel> {
        self.candidate.as_ref()?;
        self.nearest.as_ref().map(|n| n.permission_level)
    }
}

impl Validate for FaceMatchResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        if let Some(n) = &self.nearest {
            if !n.distance.is_finite() || n.distance < 0.0 {
                return Err(ContractViolation::InvalidValue {
                    field: "face_match_result.nearest.distance",
                    reason: "must be finite and >= 0",
                });
            }
        }
        match (&self.candidate, &self.nearest) {
            (Some(_), None) => Err(ContractViolation::InvalidValue {
                field: "face_match_result.candidate",
                reason: "candidate requires a nearest entry",
            }),
            (Some(c), Some(n)) if *c != n.identity_id => Err(ContractViolation::InvalidValue {
                field: "face_match_result.candidate",
                reason: "candidate must be the nearest entry",
            }),
            _ => Ok(()),
        }
    }
}
