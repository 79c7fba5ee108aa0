// SPDX-License-Identifier: PMPL-1.0-or-later
//! Error types for hintbot

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the analysis engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The configured connector name has no registered factory.
    #[error("Connector \"{0}\" not found")]
    ConnectorNotFound(String),

    #[error("Rule \"{0}\" is already registered")]
    DuplicateRule(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Payload for \"{topic}\" must be {expected}, got {found}")]
    PayloadMismatch {
        topic: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid ignored URL pattern \"{pattern}\" for \"{key}\": {source}")]
    InvalidPattern {
        key: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid configuration for rule \"{rule_id}\": {reason}")]
    InvalidRuleConfig { rule_id: String, reason: String },

    /// A subscriber raised an error. Never swallowed by the scheduler.
    #[error("Handler \"{subscriber}\" failed on \"{topic}\": {source}")]
    HandlerFailure {
        subscriber: String,
        topic: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Connector error: {0}")]
    Connector(#[source] anyhow::Error),

    #[error("A scan is already running on this engine")]
    ScanInProgress,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether this error came out of a rule or listener body
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, EngineError::HandlerFailure { .. })
    }
}
