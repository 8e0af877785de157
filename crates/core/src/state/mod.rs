//! # Session State
//!
//! Session records, the lifecycle state machine and the session store.

pub mod machine;
pub mod session;
pub mod store;

pub use machine::{Operation, SessionStatus};
pub use session::{
    AudienceLevel, Complexity, ContentType, ContentVersion, GenerationParameters, Session, Tone,
};
pub use store::{InMemorySessionStore, SessionStore};
