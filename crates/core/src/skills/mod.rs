//! # Pressroom Skills
//!
//! The reasoning-driven roles of a session.
//!
//! ## Architecture
//!
//! ```text
//! LeadOrchestrator (classify, plan, synthesize, generate, iterate)
//!   └── Coordinator
//!         └── ResearchWorker (search → evaluate → extract → summarize)
//! ```
//!
//! Prompt text lives in `defaults/` and is compiled in by [`prompts`].

pub mod orchestrator_skill;
pub mod prompts;
pub mod researcher_skill;

pub use orchestrator_skill::{
    FeedbackAction, FeedbackAnalysis, LeadOrchestrator, Outline, PlannedTask, ResearchOutcome,
    ResearchPlan, Synthesis,
};
pub use researcher_skill::{new_worker_id, OutputFormat, ResearchWorker, WorkerTask};
