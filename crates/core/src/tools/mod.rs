//! # Tools
//!
//! External collaborators of the engine, each behind a trait so tests can
//! script them:
//!
//! - [`llm`]: reasoning (text generation, streaming, structured output)
//! - [`search`]: web discovery
//! - [`scrape`]: content extraction
//! - [`publish`]: HTML export and WordPress

pub mod llm;
pub mod publish;
pub mod scrape;
pub mod search;

pub use llm::{
    generate_structured, parse_structured, HttpReasoningService, ReasoningRequest,
    ReasoningService, TextStream,
};
pub use publish::{
    HttpPublisher, PostStatus, PublishDocument, PublishReceipt, PublishTarget, PublishingSink,
};
pub use scrape::{ExtractionService, FirecrawlExtraction, HttpExtraction};
pub use search::{DiscoveryBackend, DiscoveryService, FirecrawlDiscovery, SearxngDiscovery};
