//! Error types for Femtocode
//!
//! This module defines all error types used throughout the Femtocode runtime.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

/// The primary error type for Femtocode operations.
#[derive(Error, Debug)]
pub enum FemtoError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider errors (API failures, non-200 responses, transport errors).
    /// Never retried inside the agent loop — surfaced to the caller as-is.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool execution errors (invalid parameters, execution failures, etc.)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Session management errors (invalid state, unknown session keys, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// Approval gate misuse (second request while one is pending, resolving
    /// an idle gate, etc.)
    #[error("Approval error: {0}")]
    Approval(String),

    /// Undo journal errors (missing backup, unapproved operation, etc.)
    #[error("Undo error: {0}")]
    Undo(String),

    /// Protocol-bridge errors (malformed bridge tool name, unknown server,
    /// remote call failure)
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Security violations (dangerous commands, blocked patterns)
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Cooperative interrupt. Not a failure — callers decide how to render it.
    #[error("Interrupted")]
    Interrupted,

    /// Resource not found (tasks, operations, subagents, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FemtoError {
    /// Returns `true` for the cooperative-interrupt variant.
    ///
    /// Interrupts are propagated as results rather than failures so callers
    /// can choose not to display them as errors.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, FemtoError::Interrupted)
    }
}

/// A specialized `Result` type for Femtocode operations.
pub type Result<T> = std::result::Result<T, FemtoError>;
