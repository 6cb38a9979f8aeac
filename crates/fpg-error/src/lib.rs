// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for the fingerprint gateway.
//!
//! Every failure surfaced to a client carries a stable machine-readable code
//! and a fixed HTTP status. The daemon owns the conversion into responses;
//! this crate stays free of any HTTP framework types.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use thiserror::Error;

/// Broad family that a [`GatewayError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The client sent something the gateway cannot act on.
    Client,
    /// The engine binary failed, timed out, or produced nothing usable.
    Engine,
    /// Session chunk storage failed underneath the gateway.
    Storage,
}

/// Request-level failures surfaced by the gateway core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or empty payload, unknown scan type, invalid session id,
    /// invalid JSON overrides, or disallowed match-config overrides.
    #[error("{0}")]
    BadInput(String),

    /// The payload carries HPSM fingerprints while the server has HPSM
    /// support disabled.
    #[error("ERROR HPSM fingerprints are not enabled on this server")]
    HpsmForbidden,

    /// The engine invocation failed, timed out, or every shard of a
    /// multi-worker scan came back empty.
    #[error("{0}")]
    EngineFailed(String),

    /// A single-shot auxiliary engine call failed.
    #[error("{0}")]
    EngineTransient(String),

    /// Appending to or reading from a session file failed.
    #[error("session storage failure: {0}")]
    SessionIo(String),
}

impl GatewayError {
    /// Stable snake_case code for logs and structured clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadInput(_) => "bad_input",
            Self::HpsmForbidden => "hpsm_forbidden",
            Self::EngineFailed(_) => "engine_failed",
            Self::EngineTransient(_) => "engine_transient",
            Self::SessionIo(_) => "session_io",
        }
    }

    /// HTTP status this error maps to.
    pub fn status_u16(&self) -> u16 {
        match self {
            Self::BadInput(_) => 400,
            Self::HpsmForbidden => 403,
            Self::EngineFailed(_) | Self::EngineTransient(_) | Self::SessionIo(_) => 500,
        }
    }

    /// Returns the broad [`ErrorCategory`] this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BadInput(_) | Self::HpsmForbidden => ErrorCategory::Client,
            Self::EngineFailed(_) | Self::EngineTransient(_) => ErrorCategory::Engine,
            Self::SessionIo(_) => ErrorCategory::Storage,
        }
    }
}
