//! Scripted collaborators for unit tests.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::memory::Source;
use crate::models::ReasoningPurpose;
use crate::tools::{
    DiscoveryService, ExtractionService, PublishDocument, PublishReceipt, PublishTarget,
    PublishingSink, ReasoningRequest, ReasoningService, TextStream,
};

pub const DEFAULT_PLAN: &str = r#"[
  {"objective": "Background and history", "search_queries": ["background overview", "history timeline"], "tool_guidance": "Prefer primary sources"},
  {"objective": "Current practice", "search_queries": ["current practice", "practice survey"], "tool_guidance": ""},
  {"objective": "Market costs", "search_queries": ["market costs", "market pricing"], "tool_guidance": ""}
]"#;

pub const DEFAULT_ANALYSIS: &str = r#"{
  "action": "modify_section",
  "sections_affected": ["Introduction"],
  "specific_changes": ["Tighten the introduction"],
  "research_queries": []
}"#;

pub const DRAFT_CHUNKS: &[&str] = &["# Title\n\n", "Body ", "text."];
pub const REVISE_CHUNKS: &[&str] = &["# Title\n\n", "Revised ", "body."];

/// Reasoning service with canned replies per purpose
pub struct ScriptedReasoning {
    replies: HashMap<ReasoningPurpose, String>,
    chunks: HashMap<ReasoningPurpose, Vec<String>>,
    failing: HashSet<ReasoningPurpose>,
    failing_once: Mutex<HashSet<ReasoningPurpose>>,
    delays: HashMap<ReasoningPurpose, Duration>,
    calls: Mutex<Vec<ReasoningPurpose>>,
}

impl Default for ScriptedReasoning {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        let replies = [
            (ReasoningPurpose::Classify, "MODERATE"),
            (ReasoningPurpose::Plan, DEFAULT_PLAN),
            (ReasoningPurpose::Evaluate, r#"{"indices":[0,1,2]}"#),
            (ReasoningPurpose::WorkerSynthesis, "Worker summary"),
            (ReasoningPurpose::Synthesis, "Synthesis text"),
            (ReasoningPurpose::FollowUp, "[]"),
            (ReasoningPurpose::Outline, "# Outline\n\n1. Intro\n2. Body"),
            (ReasoningPurpose::AnalyzeFeedback, DEFAULT_ANALYSIS),
        ]
        .into_iter()
        .map(|(p, text)| (p, text.to_string()))
        .collect();

        let chunks = [
            (ReasoningPurpose::Draft, DRAFT_CHUNKS),
            (ReasoningPurpose::Revise, REVISE_CHUNKS),
        ]
        .into_iter()
        .map(|(p, parts)| (p, parts.iter().map(|s| s.to_string()).collect()))
        .collect();

        Self {
            replies,
            chunks,
            failing: HashSet::new(),
            failing_once: Mutex::new(HashSet::new()),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(mut self, purpose: ReasoningPurpose, text: &str) -> Self {
        self.chunks.remove(&purpose);
        self.replies.insert(purpose, text.to_string());
        self
    }

    pub fn chunks(mut self, purpose: ReasoningPurpose, parts: &[&str]) -> Self {
        self.chunks
            .insert(purpose, parts.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn failing(mut self, purpose: ReasoningPurpose) -> Self {
        self.failing.insert(purpose);
        self
    }

    /// Fail only the first call for `purpose`
    pub fn failing_once(self, purpose: ReasoningPurpose) -> Self {
        if let Ok(mut once) = self.failing_once.lock() {
            once.insert(purpose);
        }
        self
    }

    pub fn delayed(mut self, purpose: ReasoningPurpose, delay: Duration) -> Self {
        self.delays.insert(purpose, delay);
        self
    }

    /// Purposes called so far, in call order
    pub fn calls(&self) -> Vec<ReasoningPurpose> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, purpose: ReasoningPurpose) -> usize {
        self.calls().into_iter().filter(|p| *p == purpose).count()
    }

    async fn enter(&self, purpose: ReasoningPurpose) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(purpose);
        }
        if let Some(delay) = self.delays.get(&purpose) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&purpose) {
            bail!("scripted {} failure", purpose.as_str());
        }
        let first_call = self
            .failing_once
            .lock()
            .map(|mut once| once.remove(&purpose))
            .unwrap_or(false);
        if first_call {
            bail!("scripted one-off {} failure", purpose.as_str());
        }
        Ok(())
    }

    fn parts(&self, purpose: ReasoningPurpose) -> Vec<String> {
        if let Some(parts) = self.chunks.get(&purpose) {
            return parts.clone();
        }
        vec![self.replies.get(&purpose).cloned().unwrap_or_default()]
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn generate(&self, request: ReasoningRequest) -> Result<String> {
        self.enter(request.purpose).await?;
        Ok(self.parts(request.purpose).concat())
    }

    async fn stream(&self, request: ReasoningRequest) -> Result<TextStream> {
        self.enter(request.purpose).await?;
        let parts: Vec<Result<String>> = self.parts(request.purpose).into_iter().map(Ok).collect();
        Ok(stream::iter(parts).boxed())
    }
}

fn slug(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Discovery that invents `per_query` results for each query
pub struct FakeDiscovery {
    per_query: usize,
    failing: Vec<String>,
    delays: Vec<(String, Duration)>,
    calls: Mutex<Vec<String>>,
}

impl FakeDiscovery {
    pub fn new(per_query: usize) -> Self {
        Self {
            per_query,
            failing: Vec::new(),
            delays: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_queries_containing(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    pub fn delayed_for_queries_containing(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.push((needle.to_string(), delay));
        self
    }

    /// Every query waits `delay`
    pub fn delayed(self, delay: Duration) -> Self {
        self.delayed_for_queries_containing("", delay)
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DiscoveryService for FakeDiscovery {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Source>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(query.to_string());
        }
        if let Some((_, delay)) = self.delays.iter().find(|(n, _)| query.contains(n.as_str())) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.iter().any(|n| query.contains(n.as_str())) {
            bail!("discovery unavailable for {:?}", query);
        }

        Ok((0..self.per_query.min(limit))
            .map(|i| {
                Source::new(
                    format!("https://example.com/{}/{}", slug(query), i),
                    format!("{} result {}", query, i),
                    format!("Snippet about {}", query),
                )
            })
            .collect())
    }
}

/// Extraction that echoes the URL back as page text
#[derive(Default)]
pub struct FakeExtraction {
    failing: Vec<String>,
}

impl FakeExtraction {
    pub fn failing_urls_containing(needle: &str) -> Self {
        Self {
            failing: vec![needle.to_string()],
        }
    }
}

#[async_trait]
impl ExtractionService for FakeExtraction {
    async fn extract(&self, url: &str) -> Result<String> {
        if self.failing.iter().any(|n| url.contains(n.as_str())) {
            return Err(anyhow!("fetch failed: {}", url));
        }
        Ok(format!("Full article text extracted from {}.", url))
    }
}

/// Sink that keeps what it was handed
#[derive(Default)]
pub struct RecordingPublisher {
    fail: bool,
    published: Mutex<Vec<PublishDocument>>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<PublishDocument> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PublishingSink for RecordingPublisher {
    async fn publish(&self, document: &PublishDocument, target: &PublishTarget) -> Result<PublishReceipt> {
        if self.fail {
            bail!("{} sink rejected the post", target.kind());
        }
        if let Ok(mut published) = self.published.lock() {
            published.push(document.clone());
        }
        Ok(PublishReceipt::Export {
            path: PathBuf::from(format!("exports/{}.html", document.slug())),
            title: document.title.clone(),
            html: format!("<h1>{}</h1>", document.title),
        })
    }
}
