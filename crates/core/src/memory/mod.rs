//! # Memory Module
//!
//! Shared memory for research workers and the orchestrator.
//!
//! ## Architecture
//!
//! ```text
//! worker ─┐
//! worker ─┼─ put ──→ SessionScope (write gate) ──→ MemoryStore
//! worker ─┘                                        ├─ InMemoryStore
//!                                                  ├─ SqliteMemoryStore
//! orchestrator ── aggregate ←──────────────────────└─ FileMemoryStore
//! ```

pub mod file;
pub mod findings;
pub mod in_memory;
pub mod scope;
pub mod sqlite;
pub mod store;

pub use file::FileMemoryStore;
pub use findings::{
    AggregatedFindings, FindingsOutcome, FindingsRecord, Source, WorkerSummary, RESEARCH_PREFIX,
};
pub use in_memory::InMemoryStore;
pub use scope::SessionScope;
pub use sqlite::SqliteMemoryStore;
pub use store::{aggregate, MemoryStore, StoredEntry};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Which memory backend to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
    Files { root: PathBuf },
}

impl StoreBackend {
    /// Open the configured backend
    pub fn open(&self) -> Result<Arc<dyn MemoryStore>> {
        let store: Arc<dyn MemoryStore> = match self {
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
            StoreBackend::Sqlite { path } => Arc::new(SqliteMemoryStore::open_at(path)?),
            StoreBackend::Files { root } => Arc::new(FileMemoryStore::new(root.clone())),
        };
        tracing::info!("Memory store: {}", store.name());
        Ok(store)
    }
}
