//! # In-Memory Memory Store
//!
//! Process-local map backend. The default for ephemeral sessions.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::store::{validate_key, validate_prefix, MemoryStore, StoredEntry};

#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, BTreeMap<String, StoredEntry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn put(&self, session_id: &str, entry: StoredEntry) -> Result<()> {
        validate_key(&entry.key)?;
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn get(&self, session_id: &str, key: &str) -> Result<Option<StoredEntry>> {
        validate_key(key)?;
        let sessions = self
            .sessions
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(sessions.get(session_id).and_then(|s| s.get(key)).cloned())
    }

    async fn list_keys(&self, session_id: &str, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        let sessions = self
            .sessions
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(sessions
            .get(session_id)
            .map(|entries| {
                entries
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_prefix(&self, session_id: &str, prefix: &str) -> Result<usize> {
        validate_prefix(prefix)?;
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let Some(entries) = sessions.get_mut(session_id) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        sessions.remove(session_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conformance;

    #[tokio::test]
    async fn test_in_memory_store_contract() {
        let store = InMemoryStore::new();
        conformance::exercise(&store).await;
    }
}
