//! ps360 - PowerScribe 360 activity tracker.
//!
//! ## Architecture
//!
//! - **Client**: SOAP 1.2 calls to the RAS Session, Explorer and Report services
//! - **Tracker**: Folds report events into the latest event per account
//! - **Store**: Writes changed users into the autotriage `users` table
//! - **Health**: `GET /health` for the container orchestrator
//!
//! ## Pass
//!
//! BrowseOrders(cursor..now) → GetReportEvents per signed report →
//! registry → upload dirty users → advance cursor
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (retry, backoff)

pub mod client;
pub mod health;
pub mod models;
pub mod service;
pub mod store;
pub mod tracker;

// Re-exports for convenience
pub use client::{AccountSession, PowerscribeClient};
pub use health::HealthState;
pub use models::{Config, EventType, Ps360Error, Result, User, UserLastEvent};
pub use service::Service;
pub use store::{EventSink, LogSink, PostgresSink};
pub use tracker::{CheckpointManager, Poller, UserRegistry};
