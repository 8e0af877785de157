//! # Engine Configuration
//!
//! Tunables for research sizing, timeouts, storage and model routing.
//! Loaded from `.pressroom/config.json` when present, then overridden from
//! the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::memory::StoreBackend;
use crate::models::{LlmProvider, ModelSettings};
use crate::state::Complexity;
use crate::tools::DiscoveryBackend;

pub const DEFAULT_CONFIG_PATH: &str = ".pressroom/config.json";
pub const DEFAULT_DATA_DIR: &str = ".pressroom";

/// Fan-out size and per-task limits for one complexity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBudget {
    /// Worker Tasks to launch
    pub tasks: usize,
    /// Sources each worker keeps
    pub max_sources: usize,
    /// Discovery queries each worker may run
    pub max_queries: usize,
}

impl TaskBudget {
    pub const fn new(tasks: usize, max_sources: usize, max_queries: usize) -> Self {
        Self {
            tasks,
            max_sources,
            max_queries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPolicy {
    pub simple: TaskBudget,
    pub moderate: TaskBudget,
    pub complex: TaskBudget,
}

impl Default for ResearchPolicy {
    fn default() -> Self {
        Self {
            simple: TaskBudget::new(1, 3, 3),
            moderate: TaskBudget::new(3, 5, 4),
            complex: TaskBudget::new(5, 5, 6),
        }
    }
}

impl ResearchPolicy {
    pub fn budget(&self, complexity: Complexity) -> TaskBudget {
        match complexity {
            Complexity::Simple => self.simple,
            Complexity::Moderate => self.moderate,
            Complexity::Complex => self.complex,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub research: ResearchPolicy,
    /// Deadline for one whole Coordinator run, in seconds
    pub worker_timeout_secs: u64,
    /// Fewer aggregated sources than this triggers the extra research round
    pub min_sources: usize,
    /// Size cap for follow-up and feedback-driven batches
    pub follow_up_tasks: usize,
    /// Sources deep-extracted per worker
    pub max_extractions: usize,
    /// Capacity of each operation's event channel
    pub event_buffer: usize,
    pub data_dir: PathBuf,
    pub store: StoreBackend,
    pub discovery: DiscoveryBackend,
    pub models: ModelSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            research: ResearchPolicy::default(),
            worker_timeout_secs: 300,
            min_sources: 3,
            follow_up_tasks: 2,
            max_extractions: 3,
            event_buffer: 64,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            store: StoreBackend::Memory,
            discovery: DiscoveryBackend::Firecrawl,
            models: ModelSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    /// Read `path` (defaults when missing or unreadable), then apply
    /// environment overrides
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config: {:?}", path))
    }

    /// Apply `PRESSROOM_*`, `SEARXNG_URL` and provider overrides read
    /// through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("PRESSROOM_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(kind) = lookup("PRESSROOM_STORE") {
            match kind.to_lowercase().as_str() {
                "memory" => self.store = StoreBackend::Memory,
                "sqlite" => {
                    self.store = StoreBackend::Sqlite {
                        path: self.data_dir.join("pressroom.db"),
                    }
                }
                "files" => {
                    self.store = StoreBackend::Files {
                        root: self.data_dir.join("memory"),
                    }
                }
                other => tracing::warn!("Unknown PRESSROOM_STORE {:?}, keeping {:?}", other, self.store),
            }
        }

        if let Some(url) = lookup("SEARXNG_URL") {
            self.discovery = DiscoveryBackend::Searxng { url: Some(url) };
        }

        if let Some(provider) = lookup("PRESSROOM_PROVIDER") {
            match serde_json::from_value::<LlmProvider>(serde_json::Value::String(
                provider.to_lowercase(),
            )) {
                Ok(p) => self.models.global_provider = p,
                Err(_) => tracing::warn!("Unknown PRESSROOM_PROVIDER {:?}", provider),
            }
        }
        if let Some(model) = lookup("PRESSROOM_MODEL") {
            self.models.global_model = Some(model);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.research.budget(Complexity::Simple).tasks, 1);
        assert_eq!(config.research.budget(Complexity::Moderate).tasks, 3);
        assert_eq!(config.research.budget(Complexity::Complex).tasks, 5);
        assert_eq!(config.worker_timeout(), Duration::from_secs(300));
        assert_eq!(config.store, StoreBackend::Memory);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PRESSROOM_DATA_DIR", "/var/lib/pressroom"),
            ("PRESSROOM_STORE", "sqlite"),
            ("SEARXNG_URL", "http://localhost:8080"),
            ("PRESSROOM_PROVIDER", "OpenAI"),
            ("PRESSROOM_MODEL", "gpt-4o-mini"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.store,
            StoreBackend::Sqlite {
                path: PathBuf::from("/var/lib/pressroom/pressroom.db")
            }
        );
        assert_eq!(
            config.discovery,
            DiscoveryBackend::Searxng {
                url: Some("http://localhost:8080".to_string())
            }
        );
        assert_eq!(config.models.global_provider, LlmProvider::OpenAI);
        assert_eq!(config.models.global_model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"min_sources": 5, "store": {"kind": "files", "root": "/tmp/m"}}"#)
                .unwrap();
        assert_eq!(config.min_sources, 5);
        assert_eq!(config.follow_up_tasks, 2);
        assert_eq!(
            config.store,
            StoreBackend::Files {
                root: PathBuf::from("/tmp/m")
            }
        );
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = EngineConfig::default();
        config.min_sources = 7;
        config.save(&path).await.unwrap();

        let loaded = EngineConfig::load(&path).await;
        assert_eq!(loaded.min_sources, 7);
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = EngineConfig::load(dir.path().join("absent.json")).await;
        assert_eq!(loaded.follow_up_tasks, 2);
    }
}
