#![forbid(unsafe_code)]

pub mod access_engine;
pub mod alerts;
pub mod clock;
pub mod config;
pub mod device_session;
pub mod encoding_store;
pub mod history_ledger;
pub mod registry;
