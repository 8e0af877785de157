//! # Swarm Orchestration
//!
//! Runs session operations and fans research out across workers.
//!
//! ## Operation Flow
//!
//! ```text
//! Engine (state machine gate) → LeadOrchestrator → Coordinator → ResearchWorker × N
//!        ↑                                                            │
//!        └──────────── EventStream ←── progress / content ←───────────┘
//! ```

pub mod coordinator;
pub mod engine;
pub mod events;

pub use coordinator::Coordinator;
pub use engine::{Engine, PublishRecord, Services, SESSION_KEY};
pub use events::{EventSink, EventStream, Phase, SessionEvent};
