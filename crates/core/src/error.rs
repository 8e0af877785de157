//! # Engine Errors
//!
//! Error taxonomy for the orchestration engine. Per-worker and per-source
//! failures never surface here; they are recorded in Findings Records.

use crate::state::{Operation, SessionStatus};
use thiserror::Error;

/// Errors surfaced by the engine to its caller
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation is not legal from the session's current status
    #[error("invalid state: cannot {operation} (requires {required}, session is {actual})")]
    InvalidTransition {
        operation: Operation,
        required: String,
        actual: SessionStatus,
    },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("version {version} not found for session {session_id}")]
    VersionNotFound { session_id: String, version: u32 },

    #[error("key not found: {session_id}/{key}")]
    KeyNotFound { session_id: String, key: String },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The session was deleted while work for it was still in flight
    #[error("session {0} has been deleted")]
    SessionClosed(String),

    #[error("reasoning service failed: {0}")]
    Reasoning(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("publishing failed: {0}")]
    Publishing(String),
}

impl EngineError {
    /// Wrap a reasoning-service failure, keeping the full context chain
    pub fn reasoning(err: anyhow::Error) -> Self {
        Self::Reasoning(format!("{:#}", err))
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }

    pub fn publishing(err: anyhow::Error) -> Self {
        Self::Publishing(format!("{:#}", err))
    }

    /// Whether the error means something the caller referenced does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::VersionNotFound { .. } | Self::KeyNotFound { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
