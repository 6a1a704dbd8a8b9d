//! Crate-wide error taxonomy.
//!
//! One enum per failure kind, with `From` impls at the I/O, JSON, regex,
//! and HTTP seams.

use thiserror::Error;

/// Errors that can occur while executing a task pack.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("input error: {0}")]
    Input(String),

    #[error("step '{step_id}' timed out after {timeout_ms}ms")]
    StepTimeout { step_id: String, timeout_ms: u64 },

    #[error("target not found for step '{step_id}': {reason}")]
    TargetNotFound { step_id: String, reason: String },

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("network_find found no match for step '{step_id}' within {waited_ms}ms")]
    NetworkFind { step_id: String, waited_ms: u64 },

    #[error("replay error: {0}")]
    Replay(String),

    #[error("sensitive header '{0}' cannot be overridden")]
    SensitiveHeader(String),

    #[error("snapshot drifted for step '{step_id}': expected status class {expected}, got {actual}")]
    SnapshotDrift {
        step_id: String,
        expected: String,
        actual: u16,
    },

    #[error("auth failure: {0}")]
    AuthFailure(String),

    #[error("operational error: {0}")]
    Operational(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Operational(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<regex::Error> for EngineError {
    fn from(err: regex::Error) -> Self {
        EngineError::Validation(format!("invalid regex: {err}"))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Operational(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
