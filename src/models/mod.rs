//! Core data models for ps360.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters

mod config;
mod error;
mod event;

pub use config::*;
pub use error::*;
pub use event::*;
