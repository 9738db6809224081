// followguard/src/lib.rs
//
// Followguard: bot-follower fraud detection.
//
// Follow/unfollow events are checked for bot patterns, suspicious follower
// accounts are flagged with signals, and every user gets a 0–100 risk score
// that drives an authenticity badge. Admins moderate through reviews; batch
// jobs re-scan history; dashboards and trends summarise the state.

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod events;
pub mod ingest;
pub mod profiles;
pub mod query_api;
pub mod service;
pub mod state;
pub mod workers;

pub use config::FraudConfig;
pub use error::{FraudError, Result};
pub use service::{FraudService, ServiceOptions};
