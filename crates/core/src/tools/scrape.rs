//! # Extraction Service
//!
//! Pulls the readable text of a single URL. Firecrawl returns markdown of
//! the main content; the plain HTTP fallback strips tags itself.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

use super::search::FIRECRAWL_BASE_URL;

#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, url: &str) -> Result<String>;
}

/// Firecrawl `/scrape` with main-content markdown
pub struct FirecrawlExtraction {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FirecrawlExtraction {
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
}

#[async_trait]
impl ExtractionService for FirecrawlExtraction {
    async fn extract(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(60))
            .json(&json!({
                "url": url,
                "formats": ["markdown"],
                "onlyMainContent": true,
            }))
            .send()
            .await
            .with_context(|| format!("Firecrawl scrape failed for {}", url))?;

        if !response.status().is_success() {
            bail!("Firecrawl scrape returned {} for {}", response.status(), url);
        }

        let body: Value = response.json().await?;
        let markdown = body["data"]["markdown"].as_str().unwrap_or("").trim();
        if markdown.is_empty() {
            bail!("no content extracted from {}", url);
        }
        Ok(markdown.to_string())
    }
}

/// Direct GET with naive HTML-to-text
pub struct HttpExtraction {
    client: reqwest::Client,
}

impl HttpExtraction {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("pressroom/0.1")
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn replace_all(cell: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str, with: &str) -> String {
    match cached(cell, pattern) {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

static BLOCK_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TAG_RE: OnceLock<Option<Regex>> = OnceLock::new();
static SPACE_RE: OnceLock<Option<Regex>> = OnceLock::new();

const BLOCK_PATTERN: &str =
    r"(?is)<(script|style|noscript|svg|head)\b.*?</(script|style|noscript|svg|head)>";
const TAG_PATTERN: &str = r"(?s)<[^>]*>";
const SPACE_PATTERN: &str = r"[ \t\r\f]+";

/// Reduce an HTML document to readable text
pub fn html_to_text(html: &str) -> String {
    let without_blocks = replace_all(&BLOCK_RE, BLOCK_PATTERN, html, " ");
    let without_tags = replace_all(&TAG_RE, TAG_PATTERN, &without_blocks, "\n");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    decoded
        .lines()
        .map(|line| replace_all(&SPACE_RE, SPACE_PATTERN, line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ExtractionService for HttpExtraction {
    async fn extract(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        if !response.status().is_success() {
            bail!("{} returned {}", url, response.status());
        }
        let text = html_to_text(&response.text().await?);
        if text.is_empty() {
            bail!("no content extracted from {}", url);
        }
        Ok(text)
    }
}

/// Firecrawl when a key is configured, otherwise direct fetch
pub fn extraction_from_env() -> Result<Box<dyn ExtractionService>> {
    match FirecrawlExtraction::from_env() {
        Ok(firecrawl) => Ok(Box::new(firecrawl)),
        Err(_) => {
            tracing::info!("FIRECRAWL_API_KEY not set, extracting pages directly");
            Ok(Box::new(HttpExtraction::new()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><title>x</title></head><body>
            <script>var a = 1;</script>
            <h1>Edge   Computing</h1><p>Latency &amp; cost</p>
            <style>p { color: red }</style></body></html>"#;
        let text = html_to_text(html);
        assert_eq!(text, "Edge Computing\nLatency & cost");
    }
}
