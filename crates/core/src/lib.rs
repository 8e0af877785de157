//! # Pressroom Core
//!
//! Session orchestration engine for a research-then-write content
//! pipeline: parallel research fan-out, lossless aggregation through shared
//! memory, streamed generation and feedback-driven iteration.
//!
//! ## Architecture
//!
//! - `state/` - Sessions, Content Versions and the lifecycle state machine
//! - `memory/` - Shared memory store backends and aggregation
//! - `skills/` - Research worker, lead orchestrator and prompts
//! - `swarm/` - Fan-out coordinator, event stream and the `Engine`
//! - `tools/` - Reasoning, discovery, extraction and publishing clients
//! - `models` - LLM provider configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pressroom_core::{Engine, EngineConfig, GenerationParameters};
//! use futures::StreamExt;
//!
//! let engine = Engine::from_config(EngineConfig::load(".pressroom/config.json").await)?;
//! let session = engine.create("WebAssembly in 2025", GenerationParameters::default()).await?;
//! let mut events = engine.start_research(&session.id).await?;
//! while let Some(event) = events.next().await {
//!     println!("{}: {:?}", event.name(), event);
//! }
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use memory::{AggregatedFindings, FindingsRecord, MemoryStore, Source, StoreBackend};
pub use state::{
    AudienceLevel, Complexity, ContentType, ContentVersion, GenerationParameters, Operation,
    Session, SessionStatus, Tone,
};
pub use swarm::{Engine, EventStream, Phase, SessionEvent, Services};
pub use tools::{PublishReceipt, PublishTarget};
