#![forbid(unsafe_code)]

pub mod access_decision;
pub mod face_match;
pub mod trust;
