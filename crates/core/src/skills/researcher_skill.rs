//! # Researcher Skill
//!
//! The research worker. Given one [`WorkerTask`] it searches broad to
//! narrow, filters candidates, deep-extracts a few of them in parallel,
//! summarizes, and writes exactly one Findings Record straight to session
//! memory. Failures become error records; they never propagate.

use anyhow::{bail, Result};
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::memory::{FindingsRecord, SessionScope, Source};
use crate::models::ReasoningPurpose;
use crate::skills::prompts;
use crate::tools::search::{truncate_chars, EXCERPT_CHARS};
use crate::tools::{
    generate_structured, DiscoveryService, ExtractionService, ReasoningRequest, ReasoningService,
};

/// Queries run in the broad phase
const BROAD_QUERIES: usize = 2;
const BROAD_LIMIT: usize = 5;
const NARROW_LIMIT: usize = 3;
/// Candidates shown to the evaluation step
const EVALUATION_WINDOW: usize = 10;
/// Candidates kept when evaluation gives nothing usable
const EVALUATION_FALLBACK: usize = 3;
/// Extracted text per source fed into the worker summary
const CONTEXT_CHARS: usize = 1500;
const EXTRACTED_CHARS: usize = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Summary,
    Detailed,
    BulletPoints,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Detailed => "detailed summary",
            Self::BulletPoints => "bullet-point list",
        }
    }
}

/// A unit of parallel research work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub objective: String,
    /// First one or two are broad, the rest narrow
    pub queries: Vec<String>,
    pub max_sources: usize,
    #[serde(default)]
    pub guidance: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl WorkerTask {
    pub fn new(objective: impl Into<String>, queries: Vec<String>) -> Self {
        Self {
            objective: objective.into(),
            queries,
            max_sources: 5,
            guidance: String::new(),
            output_format: OutputFormat::default(),
        }
    }

    pub fn with_max_sources(mut self, max_sources: usize) -> Self {
        self.max_sources = max_sources;
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = guidance.into();
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    fn broad_queries(&self) -> &[String] {
        &self.queries[..self.queries.len().min(BROAD_QUERIES)]
    }

    fn narrow_queries(&self) -> &[String] {
        &self.queries[self.queries.len().min(BROAD_QUERIES)..]
    }
}

/// Worker id in the form `research_<8 hex>`
pub fn new_worker_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("research_{}", &id[..8])
}

/// Reply shape of the evaluation step
#[derive(Debug, Deserialize, JsonSchema)]
struct SourceSelection {
    /// 0-based indices of the sources worth reading, best first
    indices: Vec<usize>,
}

struct Extracted {
    source: Source,
    content: String,
}

pub struct ResearchWorker {
    discovery: Arc<dyn DiscoveryService>,
    extraction: Arc<dyn ExtractionService>,
    reasoning: Arc<dyn ReasoningService>,
    max_extractions: usize,
}

impl ResearchWorker {
    pub fn new(
        discovery: Arc<dyn DiscoveryService>,
        extraction: Arc<dyn ExtractionService>,
        reasoning: Arc<dyn ReasoningService>,
    ) -> Self {
        Self {
            discovery,
            extraction,
            reasoning,
            max_extractions: 3,
        }
    }

    pub fn with_max_extractions(mut self, max_extractions: usize) -> Self {
        self.max_extractions = max_extractions.max(1);
        self
    }

    /// Run `task` and write its Findings Record under `research/<worker_id>`.
    /// Always returns the record that was produced.
    pub async fn execute(&self, scope: &SessionScope, worker_id: &str, task: &WorkerTask) -> FindingsRecord {
        let mut discovery_count = 0u32;
        let record = match self.investigate(task, &mut discovery_count).await {
            Ok((summary, sources)) => {
                tracing::debug!(
                    "{} finished with {} sources after {} queries",
                    worker_id,
                    sources.len(),
                    discovery_count
                );
                FindingsRecord::success(worker_id, &task.objective, summary, sources, discovery_count)
            }
            Err(e) => {
                tracing::warn!("{} failed: {:#}", worker_id, e);
                FindingsRecord::error(worker_id, &task.objective, format!("{:#}", e), discovery_count)
            }
        };

        if let Err(e) = scope.put(&FindingsRecord::key(worker_id), &record).await {
            tracing::warn!("{} could not store findings: {}", worker_id, e);
        }
        record
    }

    async fn investigate(&self, task: &WorkerTask, discovery_count: &mut u32) -> Result<(String, Vec<Source>)> {
        if task.queries.is_empty() {
            bail!("task has no discovery queries");
        }

        let mut seen = HashSet::new();
        let broad = self
            .search_all(task.broad_queries(), BROAD_LIMIT, discovery_count, &mut seen)
            .await;
        let mut candidates = self.evaluate(task, broad).await;

        if candidates.len() < task.max_sources {
            let narrow = self
                .search_all(task.narrow_queries(), NARROW_LIMIT, discovery_count, &mut seen)
                .await;
            candidates.extend(narrow);
        }
        candidates.truncate(task.max_sources.max(1));

        if candidates.is_empty() {
            bail!("no sources found for \"{}\"", task.objective);
        }

        let extracted = self.extract_all(&candidates).await;
        if extracted.is_empty() {
            bail!("no content could be extracted from {} sources", candidates.len());
        }

        let summary = self.summarize(task, &extracted).await?;
        Ok((summary, extracted.into_iter().map(|e| e.source).collect()))
    }

    /// Run each query, skipping failures and URLs already seen
    async fn search_all(
        &self,
        queries: &[String],
        limit: usize,
        discovery_count: &mut u32,
        seen: &mut HashSet<String>,
    ) -> Vec<Source> {
        let mut results = Vec::new();
        for query in queries {
            *discovery_count += 1;
            match self.discovery.search(query, limit).await {
                Ok(hits) => {
                    tracing::debug!("Query {:?} returned {} results", query, hits.len());
                    results.extend(hits.into_iter().filter(|s| seen.insert(s.url.clone())));
                }
                Err(e) => tracing::warn!("Query {:?} failed: {:#}", query, e),
            }
        }
        results
    }

    /// Keep the candidates the reasoning service picks, or the first few
    /// when its answer is unusable
    async fn evaluate(&self, task: &WorkerTask, candidates: Vec<Source>) -> Vec<Source> {
        if candidates.is_empty() {
            return candidates;
        }

        let listing = candidates
            .iter()
            .take(EVALUATION_WINDOW)
            .enumerate()
            .map(|(i, s)| format!("{}. {}: {}\n   {}", i, s.title, s.url, truncate_chars(&s.excerpt, 200)))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = prompts::render(
            prompts::EVALUATE,
            &[
                ("objective", task.objective.as_str()),
                ("sources", listing.as_str()),
                ("guidance", task.guidance.as_str()),
            ],
        );

        let selection: Result<SourceSelection> = generate_structured(
            self.reasoning.as_ref(),
            ReasoningRequest::new(ReasoningPurpose::Evaluate, prompt),
        )
        .await;

        let mut picked = Vec::new();
        if let Ok(selection) = selection {
            let mut used = HashSet::new();
            for index in selection.indices {
                if index < candidates.len().min(EVALUATION_WINDOW) && used.insert(index) {
                    picked.push(candidates[index].clone());
                }
            }
        }

        if picked.is_empty() {
            tracing::debug!("Evaluation unusable, keeping first {}", EVALUATION_FALLBACK);
            candidates.into_iter().take(EVALUATION_FALLBACK).collect()
        } else {
            picked
        }
    }

    /// Extract up to `max_extractions` candidates concurrently; failed URLs
    /// are dropped
    async fn extract_all(&self, candidates: &[Source]) -> Vec<Extracted> {
        let jobs = candidates.iter().take(self.max_extractions).map(|source| async move {
            match self.extraction.extract(&source.url).await {
                Ok(text) => {
                    let content = truncate_chars(&text, EXTRACTED_CHARS);
                    Some(Extracted {
                        source: Source::new(
                            &source.url,
                            &source.title,
                            truncate_chars(&content, EXCERPT_CHARS),
                        ),
                        content,
                    })
                }
                Err(e) => {
                    tracing::warn!("Extraction failed for {}: {:#}", source.url, e);
                    None
                }
            }
        });

        join_all(jobs).await.into_iter().flatten().collect()
    }

    async fn summarize(&self, task: &WorkerTask, extracted: &[Extracted]) -> Result<String> {
        let context = extracted
            .iter()
            .map(|e| {
                format!(
                    "## {}\nURL: {}\n\n{}",
                    e.source.title,
                    e.source.url,
                    truncate_chars(&e.content, CONTEXT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let prompt = prompts::render(
            prompts::WORKER_SYNTHESIS,
            &[
                ("objective", task.objective.as_str()),
                ("context", context.as_str()),
                ("output_format", task.output_format.as_str()),
            ],
        );
        let summary = self
            .reasoning
            .generate(ReasoningRequest::new(ReasoningPurpose::WorkerSynthesis, prompt))
            .await?;
        Ok(summary.trim().to_string())
    }
}
