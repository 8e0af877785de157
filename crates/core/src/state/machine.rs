//! # Session State Machine
//!
//! Owns the legal lifecycle of a session:
//!
//! ```text
//! created → researching → ready_for_generation → generating → ready_for_review ⇄ iterating
//!                                                                   │
//!                                                                   └→ published
//! ```
//!
//! Every state also accepts `delete`. Long-running operations pass through an
//! in-flight state and either complete forward or revert to where they started.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Researching,
    ReadyForGeneration,
    Generating,
    ReadyForReview,
    Iterating,
    Published,
    Deleted,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 8] = [
        SessionStatus::Created,
        SessionStatus::Researching,
        SessionStatus::ReadyForGeneration,
        SessionStatus::Generating,
        SessionStatus::ReadyForReview,
        SessionStatus::Iterating,
        SessionStatus::Published,
        SessionStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Researching => "researching",
            Self::ReadyForGeneration => "ready_for_generation",
            Self::Generating => "generating",
            Self::ReadyForReview => "ready_for_review",
            Self::Iterating => "iterating",
            Self::Published => "published",
            Self::Deleted => "deleted",
        }
    }

    /// An operation is currently running against the session
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Researching | Self::Generating | Self::Iterating)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Deleted)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-visible operations gated by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    StartResearch,
    StartGeneration,
    Iterate,
    Publish,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Create,
        Operation::StartResearch,
        Operation::StartGeneration,
        Operation::Iterate,
        Operation::Publish,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::StartResearch => "start research",
            Self::StartGeneration => "start generation",
            Self::Iterate => "iterate",
            Self::Publish => "publish",
            Self::Delete => "delete",
        }
    }

    /// State the session must be in for the operation to start.
    /// `None` means the operation has no single required state.
    pub fn required(&self) -> Option<SessionStatus> {
        match self {
            Self::Create | Self::Delete => None,
            Self::StartResearch => Some(SessionStatus::Created),
            Self::StartGeneration => Some(SessionStatus::ReadyForGeneration),
            Self::Iterate | Self::Publish => Some(SessionStatus::ReadyForReview),
        }
    }

    /// Transient state held while the operation runs
    pub fn in_flight(&self) -> Option<SessionStatus> {
        match self {
            Self::StartResearch => Some(SessionStatus::Researching),
            Self::StartGeneration => Some(SessionStatus::Generating),
            Self::Iterate => Some(SessionStatus::Iterating),
            Self::Create | Self::Publish | Self::Delete => None,
        }
    }

    /// State reached once the operation succeeds
    pub fn outcome(&self) -> SessionStatus {
        match self {
            Self::Create => SessionStatus::Created,
            Self::StartResearch => SessionStatus::ReadyForGeneration,
            Self::StartGeneration | Self::Iterate => SessionStatus::ReadyForReview,
            Self::Publish => SessionStatus::Published,
            Self::Delete => SessionStatus::Deleted,
        }
    }

    fn required_label(&self) -> String {
        match self {
            Self::Create => "no existing session".to_string(),
            Self::Delete => "any live state".to_string(),
            other => other
                .required()
                .map(|s| s.to_string())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn rejected(operation: Operation, actual: SessionStatus) -> EngineError {
    EngineError::InvalidTransition {
        operation,
        required: operation.required_label(),
        actual,
    }
}

/// Validate that `operation` may start from `current` and return the status
/// the session moves to immediately (the in-flight state, or the final state
/// for instantaneous operations).
pub fn begin(current: SessionStatus, operation: Operation) -> EngineResult<SessionStatus> {
    match operation {
        Operation::Create => Err(rejected(operation, current)),
        Operation::Delete if current == SessionStatus::Deleted => {
            Err(rejected(operation, current))
        }
        Operation::Delete => Ok(SessionStatus::Deleted),
        _ if operation.required() == Some(current) => Ok(operation
            .in_flight()
            .unwrap_or_else(|| operation.outcome())),
        _ => Err(rejected(operation, current)),
    }
}

/// Move an in-flight operation to its success state
pub fn complete(current: SessionStatus, operation: Operation) -> EngineResult<SessionStatus> {
    match operation.in_flight() {
        Some(running) if running == current => Ok(operation.outcome()),
        _ => Err(rejected(operation, current)),
    }
}

/// Return an in-flight operation to the state it started from, so the
/// caller can retry it
pub fn revert(current: SessionStatus, operation: Operation) -> EngineResult<SessionStatus> {
    match (operation.in_flight(), operation.required()) {
        (Some(running), Some(start)) if running == current => Ok(start),
        _ => Err(rejected(operation, current)),
    }
}

/// Every edge the machine can take, used by tests and diagnostics
pub fn is_legal_edge(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    matches!(
        (from, to),
        (Created, Researching)
            | (Researching, ReadyForGeneration)
            | (Researching, Created)
            | (ReadyForGeneration, Generating)
            | (Generating, ReadyForReview)
            | (Generating, ReadyForGeneration)
            | (ReadyForReview, Iterating)
            | (Iterating, ReadyForReview)
            | (ReadyForReview, Published)
    ) || (to == Deleted && from != Deleted)
}
