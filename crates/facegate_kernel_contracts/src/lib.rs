#![forbid(unsafe_code)]

pub mod access;
pub mod common;
pub mod device;
pub mod face_match;
pub mod history;
pub mod identity;

pub use common::{ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate};
