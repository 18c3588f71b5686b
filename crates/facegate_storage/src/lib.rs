#![forbid(unsafe_code)]

pub mod access_store;
pub mod identity_admin;
pub mod ledger;
pub mod repo;
