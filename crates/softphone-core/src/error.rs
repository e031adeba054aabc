//! Error types for softphone session coordination
//!
//! Every failure the coordinator can observe is a variant of [`SoftphoneError`].
//! Only [`SoftphoneError::Config`] is fatal: it aborts startup. The remaining
//! variants are recovered where they occur (the offending command or event is
//! dropped and logged), which keeps the engine execution context alive across
//! partial failures.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_softphone_core::error::SoftphoneError;
//!
//! let err = SoftphoneError::unknown_call_id("c-42");
//! assert!(err.is_recoverable());
//! assert!(!err.is_fatal());
//!
//! let fatal = SoftphoneError::config("engine config_path is missing");
//! assert!(fatal.is_fatal());
//! ```

use thiserror::Error;

use crate::session::CallId;

/// Main error type for softphone coordination
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SoftphoneError {
    /// Required configuration is missing, unreadable or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command reached the engine proxy after the engine was destroyed
    #[error("Engine already destroyed, dropping command: {command}")]
    EngineDestroyed {
        /// Name of the command that was dropped
        command: &'static str,
    },

    /// An event referenced a call id that is not tracked
    #[error("Unknown call id: {0}")]
    UnknownCallId(CallId),

    /// An auto-answer task already exists for this call
    #[error("Auto-answer already scheduled for call {0}")]
    AlreadyScheduled(CallId),

    /// A scheduled auto-answer fired after the call was already resolved
    #[error("Call {call_id} already resolved (phase {phase}), auto-answer skipped")]
    RaceResolved {
        /// Call the task targeted
        call_id: CallId,
        /// Phase observed when the task fired
        phase: String,
    },

    /// The engine reported a phase name this crate does not understand
    #[error("Unparseable call phase: {0}")]
    InvalidPhase(String),

    /// A call state event would move a session backwards in the lattice
    #[error("Invalid transition for call {call_id}: {from} -> {to}")]
    InvalidTransition {
        /// Call the event referenced
        call_id: CallId,
        /// Phase the session was in
        from: String,
        /// Phase the event requested
        to: String,
    },

    /// The native engine rejected or failed a command
    #[error("Engine error: {0}")]
    Engine(String),

    /// Internal ordering or lifecycle invariant broken (asserts in debug builds)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl SoftphoneError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create an unknown call id error
    pub fn unknown_call_id(call_id: impl Into<CallId>) -> Self {
        Self::UnknownCallId(call_id.into())
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Check if this error is recovered in place (command or event dropped)
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Check if this error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, SoftphoneError::Config(_))
    }
}

/// Result type for softphone operations
pub type SoftphoneResult<T> = Result<T, SoftphoneError>;

impl From<std::io::Error> for SoftphoneError {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<config::ConfigError> for SoftphoneError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::de::Error> for SoftphoneError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SoftphoneError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
