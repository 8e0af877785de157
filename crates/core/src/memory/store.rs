//! # Memory Store Contract
//!
//! Hierarchical key-value storage keyed by `(session_id, key)`. Workers
//! write their Findings Records here directly; the Lead Orchestrator reads
//! them back through [`aggregate`].
//!
//! Keys are `/`-separated segments such as `research/research_0a1b2c3d` or
//! `versions/v2`. Each value is stored inside a [`StoredEntry`] envelope
//! carrying the key and the time it was saved.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::findings::{AggregatedFindings, FindingsRecord};

/// A value as persisted by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub saved_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl StoredEntry {
    pub fn new(key: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            saved_at: Utc::now(),
            data,
        }
    }
}

/// Storage backend for session memory.
///
/// Reads of a session with nothing stored return empty results, never
/// errors. `delete_session` must leave no key of that session readable.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store `entry` at `(session_id, entry.key)`, replacing any previous value
    async fn put(&self, session_id: &str, entry: StoredEntry) -> Result<()>;

    async fn get(&self, session_id: &str, key: &str) -> Result<Option<StoredEntry>>;

    /// Keys under `session_id` starting with `prefix`. Order is unspecified.
    async fn list_keys(&self, session_id: &str, prefix: &str) -> Result<Vec<String>>;

    /// Remove every key under `session_id` starting with `prefix`, returning
    /// how many were removed
    async fn delete_prefix(&self, session_id: &str, prefix: &str) -> Result<usize>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Reject keys that could escape their session namespace
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || !key.split('/').all(valid_segment) {
        bail!("invalid memory key: {:?}", key);
    }
    Ok(())
}

pub fn validate_session_id(session_id: &str) -> Result<()> {
    if !valid_segment(session_id) {
        bail!("invalid session id: {:?}", session_id);
    }
    Ok(())
}

/// Prefixes may be empty or end in `/`; the part before must be a valid key
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(());
    }
    validate_key(trimmed)
}

/// Load every Findings Record under `prefix` and merge the successful ones.
///
/// Entries that do not decode as Findings Records are skipped with a warning.
pub async fn aggregate(
    store: &dyn MemoryStore,
    session_id: &str,
    prefix: &str,
) -> Result<AggregatedFindings> {
    let records = load_findings(store, session_id, prefix).await?;
    Ok(AggregatedFindings::from_records(&records))
}

/// Raw Findings Records under `prefix`, ordered by completion time
pub async fn load_findings(
    store: &dyn MemoryStore,
    session_id: &str,
    prefix: &str,
) -> Result<Vec<FindingsRecord>> {
    let mut keys = store.list_keys(session_id, prefix).await?;
    keys.sort();

    let mut records = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(entry) = store.get(session_id, &key).await? else {
            continue;
        };
        match serde_json::from_value::<FindingsRecord>(entry.data) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("Skipping {} in {}: {}", key, session_id, e),
        }
    }
    records.sort_by_key(|r| r.completed_at);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(validate_key("session").is_ok());
        assert!(validate_key("research/research_0a1b2c3d").is_ok());
        assert!(validate_key("versions/v12").is_ok());

        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("research//x").is_err());
        assert!(validate_key("/absolute").is_err());
        assert!(validate_key("research/.hidden").is_err());
        assert!(validate_key("has space").is_err());
    }

    #[test]
    fn test_prefix_validation() {
        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("research/").is_ok());
        assert!(validate_prefix("versions").is_ok());
        assert!(validate_prefix("../").is_err());
    }

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("6f1c2a4e-9d7b-4c1e-8b3a-2f5d6e7a8b9c").is_ok());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("..").is_err());
    }
}
