//! Error types for ps360.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad config, SOAP fault, not signed in)
//! - I^B materialized: Infrastructure failures (network, timeout, database)
//! - K_i violated: Internal invariant violations (bugs)

use thiserror::Error;

/// Top-level error type for ps360.
#[derive(Debug, Error)]
pub enum Ps360Error {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Not signed in to PowerScribe")]
    NotSignedIn,

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════

    #[error("SOAP error: {0}")]
    Soap(#[from] SoapError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

/// SOAP protocol errors returned by the RAS services.
#[derive(Debug, Error)]
pub enum SoapError {
    #[error("SOAP fault {code}: {reason}")]
    Fault { code: String, reason: String },

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Response carried no AccountSession header")]
    MissingSessionHeader,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Malformed XML: {0}")]
    Xml(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl Ps360Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Faults are answers from the server and are never retried; only
    /// transport trouble and gateway-style HTTP failures are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Soap(SoapError::HttpStatus { status, .. }) => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for ps360.
pub type Result<T> = std::result::Result<T, Ps360Error>;
