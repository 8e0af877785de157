//! # Session Scope
//!
//! A handle on one session's slice of the memory store, shared by the
//! orchestrator and every worker it launches. Writes pass through a gate
//! that deletion closes, so a worker finishing after its session was
//! deleted cannot bring keys back.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::findings::{AggregatedFindings, FindingsRecord};
use super::store::{self, MemoryStore, StoredEntry};
use crate::error::{EngineError, EngineResult};

#[derive(Clone)]
pub struct SessionScope {
    session_id: String,
    store: Arc<dyn MemoryStore>,
    open: Arc<RwLock<bool>>,
}

impl SessionScope {
    pub fn new(session_id: impl Into<String>, store: Arc<dyn MemoryStore>) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            open: Arc::new(RwLock::new(true)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn is_open(&self) -> bool {
        *self.open.read().await
    }

    /// Serialize `value` and store it at `key`
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> EngineResult<()> {
        let data = serde_json::to_value(value)
            .map_err(|e| EngineError::Storage(format!("Failed to encode {}: {}", key, e)))?;

        // Held across the write so deletion waits for in-progress puts
        let open = self.open.read().await;
        if !*open {
            return Err(EngineError::SessionClosed(self.session_id.clone()));
        }
        self.store
            .put(&self.session_id, StoredEntry::new(key, data))
            .await
            .map_err(EngineError::storage)
    }

    pub async fn get_optional<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        let Some(entry) = self
            .store
            .get(&self.session_id, key)
            .await
            .map_err(EngineError::storage)?
        else {
            return Ok(None);
        };
        serde_json::from_value(entry.data)
            .map(Some)
            .map_err(|e| EngineError::Storage(format!("Failed to decode {}: {}", key, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> EngineResult<T> {
        self.get_optional(key)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound {
                session_id: self.session_id.clone(),
                key: key.to_string(),
            })
    }

    pub async fn list_keys(&self, prefix: &str) -> EngineResult<Vec<String>> {
        self.store
            .list_keys(&self.session_id, prefix)
            .await
            .map_err(EngineError::storage)
    }

    pub async fn aggregate(&self, prefix: &str) -> EngineResult<AggregatedFindings> {
        store::aggregate(self.store.as_ref(), &self.session_id, prefix)
            .await
            .map_err(EngineError::storage)
    }

    pub async fn findings(&self, prefix: &str) -> EngineResult<Vec<FindingsRecord>> {
        store::load_findings(self.store.as_ref(), &self.session_id, prefix)
            .await
            .map_err(EngineError::storage)
    }

    /// Remove every key starting with `prefix`
    pub async fn clear(&self, prefix: &str) -> EngineResult<usize> {
        let open = self.open.read().await;
        if !*open {
            return Err(EngineError::SessionClosed(self.session_id.clone()));
        }
        self.store
            .delete_prefix(&self.session_id, prefix)
            .await
            .map_err(EngineError::storage)
    }

    /// Close the gate, wait for in-progress writes, then remove every key
    pub async fn close_and_clear(&self) -> EngineResult<()> {
        let mut open = self.open.write().await;
        *open = false;
        self.store
            .delete_session(&self.session_id)
            .await
            .map_err(EngineError::storage)
    }
}
