//! # Discovery Service
//!
//! Web search behind a trait. Two backends: the Firecrawl search API and
//! SearXNG instances (configured URL first, then public and local fallbacks).
//! Results are best effort: an empty list is a valid answer.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::memory::Source;

pub const FIRECRAWL_BASE_URL: &str = "https://api.firecrawl.dev/v1";

/// Excerpt length kept per source
pub const EXCERPT_CHARS: usize = 300;

#[async_trait]
pub trait DiscoveryService: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Source>>;
}

/// Which discovery backend to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryBackend {
    #[default]
    Firecrawl,
    Searxng {
        #[serde(default)]
        url: Option<String>,
    },
}

/// Cut `text` to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// Firecrawl `/search`
pub struct FirecrawlDiscovery {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FirecrawlDiscovery {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: FIRECRAWL_BASE_URL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("FIRECRAWL_API_KEY")
            .context("FIRECRAWL_API_KEY is not set")?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl DiscoveryService for FirecrawlDiscovery {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Source>> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(60))
            .json(&json!({
                "query": query,
                "limit": limit,
                "lang": "en",
                "country": "us",
            }))
            .send()
            .await
            .with_context(|| format!("Firecrawl search failed for {:?}", query))?;

        if !response.status().is_success() {
            bail!("Firecrawl search returned {}", response.status());
        }

        let body: Value = response.json().await?;
        Ok(body
            .get("data")
            .and_then(|d| d.as_array())
            .map(|results| {
                results
                    .iter()
                    .take(limit)
                    .map(|r| {
                        Source::new(
                            str_field(r, "url"),
                            str_field(r, "title"),
                            truncate_chars(str_field(r, "description"), EXCERPT_CHARS),
                        )
                    })
                    .filter(|s| !s.url.is_empty())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// SearXNG JSON API across a list of instances
pub struct SearxngDiscovery {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngDiscovery {
    /// Build the endpoint list:
    /// 1. configured URL (or `SEARXNG_URL`)
    /// 2. public instances
    /// 3. local fallback
    pub fn new(configured: Option<String>) -> Result<Self> {
        let mut endpoints: Vec<String> = Vec::new();

        if let Some(custom_url) = configured.or_else(|| std::env::var("SEARXNG_URL").ok()) {
            endpoints.push(format!("{}/search", custom_url.trim_end_matches('/')));
        }

        // Full list: https://searx.space/
        endpoints.extend([
            "https://searx.be/search".to_string(),
            "https://search.sapti.me/search".to_string(),
            "https://searx.tiekoetter.com/search".to_string(),
        ]);

        endpoints.push("http://localhost:8888/search".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

#[async_trait]
impl DiscoveryService for SearxngDiscovery {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Source>> {
        for endpoint in &self.endpoints {
            let url = format!("{}?q={}&format=json", endpoint, urlencoding::encode(query));

            let Ok(response) = self.client.get(&url).send().await else {
                tracing::debug!("SearXNG endpoint unreachable: {}", endpoint);
                continue;
            };
            let Ok(json) = response.json::<Value>().await else {
                continue;
            };
            if let Some(results) = json.get("results").and_then(|r| r.as_array()) {
                return Ok(results
                    .iter()
                    .take(limit)
                    .map(|r| {
                        Source::new(
                            str_field(r, "url"),
                            str_field(r, "title"),
                            truncate_chars(str_field(r, "content"), EXCERPT_CHARS),
                        )
                    })
                    .filter(|s| !s.url.is_empty())
                    .collect());
            }
        }

        tracing::warn!("No SearXNG endpoint answered for {:?}", query);
        Ok(Vec::new())
    }
}

/// Build the configured discovery backend
pub fn discovery_from(backend: &DiscoveryBackend) -> Result<Box<dyn DiscoveryService>> {
    Ok(match backend {
        DiscoveryBackend::Firecrawl => Box::new(FirecrawlDiscovery::from_env()?),
        DiscoveryBackend::Searxng { url } => Box::new(SearxngDiscovery::new(url.clone())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 300), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_searxng_endpoint_order() {
        let discovery = SearxngDiscovery::new(Some("http://search.internal/".to_string())).unwrap();
        assert_eq!(discovery.endpoints()[0], "http://search.internal/search");
        assert_eq!(
            discovery.endpoints().last().map(String::as_str),
            Some("http://localhost:8888/search")
        );
    }

    #[test]
    fn test_backend_config_shape() {
        let backend: DiscoveryBackend =
            serde_json::from_str(r#"{"kind":"searxng","url":"http://localhost:8080"}"#).unwrap();
        assert_eq!(
            backend,
            DiscoveryBackend::Searxng {
                url: Some("http://localhost:8080".to_string())
            }
        );
        let default: DiscoveryBackend = serde_json::from_str(r#"{"kind":"firecrawl"}"#).unwrap();
        assert_eq!(default, DiscoveryBackend::Firecrawl);
    }
}
