//! # File-Tree Memory Store
//!
//! One JSON file per key under `<root>/<session_id>/`, so `versions/v2`
//! lands at `<root>/<session_id>/versions/v2.json`. Each file holds the
//! full [`StoredEntry`] envelope.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::store::{validate_key, validate_prefix, validate_session_id, MemoryStore, StoredEntry};

const EXTENSION: &str = "json";

pub struct FileMemoryStore {
    root: PathBuf,
}

impl FileMemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    fn entry_path(&self, session_id: &str, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self
            .session_dir(session_id)?
            .join(format!("{}.{}", key, EXTENSION)))
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn put(&self, session_id: &str, entry: StoredEntry) -> Result<()> {
        let path = self.entry_path(session_id, &entry.key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        // Write beside the target then rename so readers never see half a file
        let tmp = path.with_extension(format!("{}.tmp-{}", EXTENSION, uuid::Uuid::new_v4().simple()));
        let json = serde_json::to_string_pretty(&entry)?;
        fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write file: {:?}", tmp))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move {:?} into place", tmp))?;
        Ok(())
    }

    async fn get(&self, session_id: &str, key: &str) -> Result<Option<StoredEntry>> {
        let path = self.entry_path(session_id, key)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read file: {:?}", path)),
        };
        let entry = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt memory file: {:?}", path))?;
        Ok(Some(entry))
    }

    async fn list_keys(&self, session_id: &str, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        let base = self.session_dir(session_id)?;
        if fs::metadata(&base).await.is_err() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read directory: {:?}", dir))
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                let Ok(relative) = path.with_extension("").strip_prefix(&base).map(Path::to_path_buf)
                else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) && validate_key(&key).is_ok() {
                    keys.push(key);
                }
            }
        }

        Ok(keys)
    }

    async fn delete_prefix(&self, session_id: &str, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.list_keys(session_id, prefix).await? {
            let path = self.entry_path(session_id, &key)?;
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to remove {:?}", path)),
            }
        }
        Ok(removed)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        // Move the tree out of the way first so no key stays readable while
        // the removal is in progress
        let tombstone = self
            .root
            .join(format!(".deleted-{}-{}", session_id, uuid::Uuid::new_v4().simple()));
        match fs::rename(&dir, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("Failed to delete {:?}", dir)),
        }
        fs::remove_dir_all(&tombstone)
            .await
            .with_context(|| format!("Failed to remove {:?}", tombstone))
    }

    fn name(&self) -> &'static str {
        "files"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conformance;

    #[tokio::test]
    async fn test_file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::new(dir.path());
        conformance::exercise(&store).await;
    }

    #[tokio::test]
    async fn test_file_layout_and_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::new(dir.path());
        store
            .put("s1", StoredEntry::new("versions/v1", serde_json::json!({"version": 1})))
            .await
            .unwrap();

        let path = dir.path().join("s1").join("versions").join("v1.json");
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["key"], "versions/v1");
        assert_eq!(raw["data"]["version"], 1);
        assert!(raw["saved_at"].is_string());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::new(dir.path());
        assert!(store.get("..", "session").await.is_err());
        assert!(store
            .put("s1", StoredEntry::new("../escape", serde_json::json!(1)))
            .await
            .is_err());
    }
}
