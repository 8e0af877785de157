//! # Session Events
//!
//! The typed, ordered event sequence each long-running operation returns.
//! `complete` or `error` is always the last event of a stream.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::state::Complexity;

/// Phase announced by a `status` event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analyzing,
    Planning,
    Researching,
    Synthesizing,
    Generating,
    Iterating,
}

/// One event in an operation's stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Status { phase: Phase, message: String },
    /// Research only, once
    Complexity { complexity: Complexity },
    /// Once, after decomposition
    Plan { task_count: usize },
    /// After each Worker Task finishes
    Progress { completed: usize, total: usize },
    /// Generation only, before the first chunk
    Outline { content: String },
    Content { chunk: String },
    /// Iteration only
    Analysis { summary: String },
    Complete { result_summary: String },
    Error { message: String },
}

impl SessionEvent {
    pub fn status(phase: Phase, message: impl Into<String>) -> Self {
        Self::Status {
            phase,
            message: message.into(),
        }
    }

    /// Wire name of the event type
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Complexity { .. } => "complexity",
            Self::Plan { .. } => "plan",
            Self::Progress { .. } => "progress",
            Self::Outline { .. } => "outline",
            Self::Content { .. } => "content",
            Self::Analysis { .. } => "analysis",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Incremental view of one operation's events
pub type EventStream = ReceiverStream<SessionEvent>;

/// Sending half of an operation's event channel.
///
/// A caller that stops listening must not break the operation, so sends to
/// a closed channel are dropped.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SessionEvent>>,
}

impl EventSink {
    /// Sink that discards everything
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                tracing::debug!("Event receiver dropped");
            }
        }
    }

    pub async fn status(&self, phase: Phase, message: impl Into<String>) {
        self.emit(SessionEvent::status(phase, message)).await;
    }
}

/// Bounded channel for one operation
pub fn channel(buffer: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EventSink { tx: Some(tx) }, ReceiverStream::new(rx))
}
