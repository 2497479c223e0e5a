//! Error types for Quire.
//!
//! This module provides the error hierarchy shared by every Quire crate,
//! built with `thiserror`.

use thiserror::Error;

/// Result type alias using `QuireError`.
pub type Result<T> = std::result::Result<T, QuireError>;

/// Main error type for all Quire operations.
#[derive(Debug, Error)]
pub enum QuireError {
    // ═══════════════════════════════════════════════════════════════════════════
    // RENDER ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// The rendering engine failed to produce output.
    #[error("Render failed: {0}")]
    RenderFailed(String),

    /// The rendering engine did not finish before its deadline.
    #[error("Render timed out after {timeout_ms}ms")]
    RenderTimeout {
        /// Deadline that elapsed, in milliseconds
        timeout_ms: u64,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // COALESCING ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// A follower gave up waiting on an in-flight render.
    ///
    /// The render may still succeed; the caller should retry later.
    #[error("Render {fingerprint} still in progress after {waited_ms}ms")]
    WaitTimeout {
        /// Hex fingerprint of the request
        fingerprint: String,
        /// Time spent waiting, in milliseconds
        waited_ms: u64,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // INPUT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// A render option could not be parsed.
    #[error("Invalid render option: {0}")]
    InvalidOptions(String),

    /// Input validation failed.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid hex encoding.
    #[error("Invalid hex encoding: {0}")]
    HexError(#[from] hex::FromHexError),

    // ═══════════════════════════════════════════════════════════════════════════
    // ENVIRONMENT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// File I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal invariant violation (should never happen).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl QuireError {
    /// Returns true if retrying the same request later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QuireError::WaitTimeout { .. } | QuireError::RenderTimeout { .. }
        )
    }

    /// Returns true if the error was caused by the request itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            QuireError::InvalidOptions(_)
                | QuireError::ValidationError(_)
                | QuireError::JsonError(_)
                | QuireError::HexError(_)
        )
    }
}
