#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const DEVICE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const DEVICE_LOCATION_MAX_LEN: usize = 255;

/// Hardware address of a camera/lock endpoint, normalized to `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceMac(String);

impl DeviceMac {
    pub fn new(mac: impl Into<String>) -> Result<Self, ContractViolation> {
        let normalized = mac.into().trim().to_ascii_lowercase().replace('-', ":");
        let v = Self(normalized);
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for DeviceMac {
    fn validate(&self) -> Result<(), ContractViolation> {
        let octets: Vec<&str> = self.0.split(':').collect();
        let ok = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.bytes().all(|b| b.is_ascii_hexdigit()));
        if !ok {
            return Err(ContractViolation::InvalidValue {
                field: "device_mac",
                reason: "must be six hex octets separated by ':'",
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for DeviceMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceLocation(String);

impl DeviceLocation {
    pub fn new(local: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(local.into().trim().to_string());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for DeviceLocation {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("device_location", &self.0, DEVICE_LOCATION_MAX_LEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub schema_version: SchemaVersion,
    pub mac: DeviceMac,
    pub local: DeviceLocation,
}

impl DeviceRecord {
    pub fn v1(mac: DeviceMac, local: DeviceLocation) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: DEVICE_CONTRACT_VERSION,
            mac,
            local,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for DeviceRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != DEVICE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "device_record.schema_version",
                reason: "must match DEVICE_CONTRACT_VERSION",
            });
        }
        self.mac.validate()?;
        self.local.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Trusted,
    Untrusted,
}
