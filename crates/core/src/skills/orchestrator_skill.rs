//! # Orchestrator Skill
//!
//! The Lead Orchestrator. Owns the reasoning-heavy half of every session
//! operation and leaves legality and status bookkeeping to the engine.
//!
//! ## Research
//!
//! ```text
//! plan → Coordinator fan-out → aggregate → synthesize
//!                                              │ total_sources < min_sources
//!                                              └→ one follow-up batch → re-synthesize
//! ```
//!
//! ## Generation and iteration
//!
//! ```text
//! synthesis → outline → streamed draft → versions/v1
//! feedback → analysis [→ small research batch] → streamed revision → versions/v<n+1>
//! ```

use chrono::{DateTime, Utc};
use futures::StreamExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::memory::{AggregatedFindings, SessionScope, RESEARCH_PREFIX};
use crate::models::ReasoningPurpose;
use crate::skills::prompts;
use crate::skills::researcher_skill::WorkerTask;
use crate::state::{Complexity, ContentVersion, Session};
use crate::swarm::coordinator::Coordinator;
use crate::swarm::events::{EventSink, Phase, SessionEvent};
use crate::tools::{generate_structured, parse_structured, ReasoningRequest, ReasoningService};

pub const PLAN_KEY: &str = "plan";
pub const SYNTHESIS_KEY: &str = "synthesis";
pub const OUTLINE_KEY: &str = "outline";
pub const VERSIONS_PREFIX: &str = "versions/";

pub const EMPTY_SYNTHESIS: &str = "No research findings available.";

/// Angles used to top up a plan that came back short
const PADDING_ANGLES: &[&str] = &[
    "fundamentals",
    "current trends",
    "practical examples",
    "common challenges",
    "expert perspectives",
];

/// Versions fed to the feedback analysis are cut to this many characters
const ANALYSIS_EXCERPT_CHARS: usize = 2000;
/// Research summaries fed to generation per worker
const RESEARCH_CONTEXT_CHARS: usize = 1500;

/// One task as proposed by the reasoning service
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlannedTask {
    pub objective: String,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub tool_guidance: String,
}

/// Stored under `plan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub topic: String,
    pub complexity: Complexity,
    pub tasks: Vec<WorkerTask>,
    pub created_at: DateTime<Utc>,
}

/// Stored under `synthesis`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub content: String,
    pub source_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Stored under `outline`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    #[default]
    ModifySection,
    Rewrite,
    AddContent,
    ResearchMore,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModifySection => "modify_section",
            Self::Rewrite => "rewrite",
            Self::AddContent => "add_content",
            Self::ResearchMore => "research_more",
        }
    }
}

/// What a piece of feedback asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FeedbackAnalysis {
    pub action: FeedbackAction,
    #[serde(default)]
    pub sections_affected: Vec<String>,
    #[serde(default)]
    pub specific_changes: Vec<String>,
    /// Only meaningful for `research_more`
    #[serde(default)]
    pub research_queries: Vec<String>,
}

impl FeedbackAnalysis {
    /// Used when the analysis reply cannot be decoded
    pub fn fallback(feedback: &str) -> Self {
        Self {
            action: FeedbackAction::ModifySection,
            sections_affected: Vec::new(),
            specific_changes: vec![feedback.to_string()],
            research_queries: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        let mut summary = format!("Action: {}", self.action.as_str());
        if !self.sections_affected.is_empty() {
            summary.push_str(&format!("; sections: {}", self.sections_affected.join(", ")));
        }
        if !self.specific_changes.is_empty() {
            summary.push_str(&format!("; changes: {}", self.specific_changes.join("; ")));
        }
        summary
    }
}

/// Result of a research run
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub synthesis: Synthesis,
    pub findings: AggregatedFindings,
    pub follow_up_ran: bool,
}

impl ResearchOutcome {
    pub fn summary(&self) -> String {
        format!(
            "Synthesized {} sources from {} of {} workers",
            self.findings.total_sources,
            self.findings.record_count - self.findings.error_count,
            self.findings.record_count
        )
    }
}

/// Ascending version numbers stored for the session
pub async fn version_numbers(scope: &SessionScope) -> EngineResult<Vec<u32>> {
    let mut numbers: Vec<u32> = scope
        .list_keys(VERSIONS_PREFIX)
        .await?
        .iter()
        .filter_map(|key| key.strip_prefix("versions/v")?.parse().ok())
        .collect();
    numbers.sort_unstable();
    Ok(numbers)
}

pub async fn latest_version(scope: &SessionScope) -> EngineResult<Option<ContentVersion>> {
    match version_numbers(scope).await?.last() {
        Some(n) => scope.get_optional(&ContentVersion::key(*n)).await,
        None => Ok(None),
    }
}

fn clip(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct LeadOrchestrator {
    reasoning: Arc<dyn ReasoningService>,
    coordinator: Coordinator,
    config: Arc<EngineConfig>,
}

impl LeadOrchestrator {
    pub fn new(reasoning: Arc<dyn ReasoningService>, coordinator: Coordinator, config: Arc<EngineConfig>) -> Self {
        Self {
            reasoning,
            coordinator,
            config,
        }
    }

    // ========================================================================
    // Research
    // ========================================================================

    /// Classify the topic into a complexity tier
    #[tracing::instrument(skip_all, fields(session = %session.id))]
    pub async fn classify(&self, session: &Session) -> EngineResult<Complexity> {
        let params = &session.parameters;
        let word_count = params.word_count.to_string();
        let prompt = prompts::render(
            prompts::CLASSIFY,
            &[
                ("topic", session.topic.as_str()),
                ("content_type", params.content_type.as_str()),
                ("word_count", word_count.as_str()),
                (
                    "custom_instructions",
                    prompts::or_none(params.custom_instructions.as_deref().unwrap_or("")),
                ),
            ],
        );

        let reply = self
            .reasoning
            .generate(ReasoningRequest::new(ReasoningPurpose::Classify, prompt))
            .await
            .map_err(EngineError::reasoning)?;
        let complexity = Complexity::from_response(&reply);
        tracing::info!("Topic classified as {}", complexity);
        Ok(complexity)
    }

    /// Decompose the topic into exactly the policy's number of tasks and
    /// store the plan
    #[tracing::instrument(skip_all, fields(session = %session.id))]
    pub async fn plan(&self, session: &Session, complexity: Complexity, scope: &SessionScope) -> EngineResult<ResearchPlan> {
        let budget = self.config.research.budget(complexity);
        let params = &session.parameters;
        let keywords = params.keywords.join(", ");
        let task_count = budget.tasks.to_string();
        let max_queries = budget.max_queries.to_string();
        let prompt = prompts::render(
            prompts::PLAN,
            &[
                ("topic", session.topic.as_str()),
                ("content_type", params.content_type.as_str()),
                ("tone", params.tone.as_str()),
                ("audience", params.audience_level.as_str()),
                ("keywords", prompts::or_none(&keywords)),
                ("task_count", task_count.as_str()),
                ("max_queries", max_queries.as_str()),
            ],
        );

        let reply = self
            .reasoning
            .generate(ReasoningRequest::new(ReasoningPurpose::Plan, prompt).with_schema_for::<Vec<PlannedTask>>())
            .await
            .map_err(EngineError::reasoning)?;

        let mut planned: Vec<PlannedTask> = match parse_structured(&reply) {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("Unusable research plan ({:#}), using fallback", e);
                Vec::new()
            }
        };
        planned.retain(|t| !t.objective.trim().is_empty());
        if planned.is_empty() {
            planned.push(fallback_task(&session.topic));
        }

        let mut angles = PADDING_ANGLES.iter().cycle();
        while planned.len() < budget.tasks {
            let angle = angles.next().copied().unwrap_or("background");
            planned.push(padding_task(&session.topic, angle));
        }
        planned.truncate(budget.tasks);

        let tasks = planned
            .into_iter()
            .map(|p| to_worker_task(p, budget.max_queries, budget.max_sources))
            .collect();
        let plan = ResearchPlan {
            topic: session.topic.clone(),
            complexity,
            tasks,
            created_at: Utc::now(),
        };
        scope.put(PLAN_KEY, &plan).await?;
        tracing::info!("Planned {} research tasks", plan.tasks.len());
        Ok(plan)
    }

    /// Plan, fan out, aggregate and synthesize, with at most one follow-up round
    #[tracing::instrument(skip_all, fields(session = %session.id, complexity = %complexity))]
    pub async fn research(
        &self,
        session: &Session,
        complexity: Complexity,
        scope: &SessionScope,
        events: &EventSink,
    ) -> EngineResult<ResearchOutcome> {
        self.reset_research(scope).await?;
        events.status(Phase::Planning, "Decomposing topic into research tasks").await;
        let plan = self.plan(session, complexity, scope).await?;
        events
            .emit(SessionEvent::Plan {
                task_count: plan.tasks.len(),
            })
            .await;

        events
            .status(Phase::Researching, format!("Running {} research workers", plan.tasks.len()))
            .await;
        self.coordinator.run(scope, plan.tasks, events).await;

        events.status(Phase::Synthesizing, "Synthesizing research findings").await;
        let mut findings = scope.aggregate(RESEARCH_PREFIX).await?;
        let mut synthesis = self.synthesize(&findings, scope).await?;
        let mut follow_up_ran = false;

        if findings.total_sources < self.config.min_sources {
            tracing::info!(
                "Coverage is thin ({} < {} sources), planning one follow-up round",
                findings.total_sources,
                self.config.min_sources
            );
            let tasks = self.follow_up_tasks(session, &synthesis).await;
            if !tasks.is_empty() {
                events
                    .status(Phase::Researching, format!("Filling coverage gaps with {} more workers", tasks.len()))
                    .await;
                self.coordinator.run(scope, tasks, events).await;

                events.status(Phase::Synthesizing, "Re-synthesizing with follow-up findings").await;
                findings = scope.aggregate(RESEARCH_PREFIX).await?;
                synthesis = self.synthesize(&findings, scope).await?;
                follow_up_ran = true;
            }
        }

        Ok(ResearchOutcome {
            synthesis,
            findings,
            follow_up_ran,
        })
    }

    /// Drop records and synthesis left by an earlier attempt that failed
    async fn reset_research(&self, scope: &SessionScope) -> EngineResult<()> {
        let stale = scope.clear(RESEARCH_PREFIX).await?;
        if stale > 0 {
            tracing::info!("Discarded {} findings from a previous research attempt", stale);
        }
        scope.clear(SYNTHESIS_KEY).await?;
        Ok(())
    }

    /// Gap-filling tasks for thin coverage. Failures mean no follow-up.
    async fn follow_up_tasks(&self, session: &Session, synthesis: &Synthesis) -> Vec<WorkerTask> {
        let limit = self.config.follow_up_tasks;
        if limit == 0 {
            return Vec::new();
        }

        let source_count = synthesis.source_count.to_string();
        let max_tasks = limit.to_string();
        let prompt = prompts::render(
            prompts::FOLLOW_UP,
            &[
                ("topic", session.topic.as_str()),
                ("source_count", source_count.as_str()),
                ("synthesis", synthesis.content.as_str()),
                ("max_tasks", max_tasks.as_str()),
            ],
        );

        let planned: Vec<PlannedTask> = match generate_structured(
            self.reasoning.as_ref(),
            ReasoningRequest::new(ReasoningPurpose::FollowUp, prompt),
        )
        .await
        {
            Ok(planned) => planned,
            Err(e) => {
                tracing::warn!("Follow-up planning failed, skipping: {:#}", e);
                return Vec::new();
            }
        };

        let budget = self.config.research.budget(Complexity::Simple);
        planned
            .into_iter()
            .filter(|p| !p.objective.trim().is_empty())
            .take(limit)
            .map(|p| to_worker_task(p, budget.max_queries, budget.max_sources))
            .collect()
    }

    /// Combine the aggregated findings into one narrative and store it
    pub async fn synthesize(&self, findings: &AggregatedFindings, scope: &SessionScope) -> EngineResult<Synthesis> {
        let content = if findings.is_empty() {
            tracing::warn!("No successful findings to synthesize");
            EMPTY_SYNTHESIS.to_string()
        } else {
            let digest = findings
                .summaries
                .iter()
                .map(|s| format!("## {}\n{}", s.objective, s.summary))
                .collect::<Vec<_>>()
                .join("\n\n");
            let sources = findings
                .sources
                .iter()
                .map(|s| format!("- {} ({})", s.title, s.url))
                .collect::<Vec<_>>()
                .join("\n");
            let body = format!(
                "{}\n\n## Sources ({})\n{}",
                digest, findings.total_sources, sources
            );
            let prompt = prompts::render(prompts::SYNTHESIS, &[("findings", body.as_str())]);
            self.reasoning
                .generate(ReasoningRequest::new(ReasoningPurpose::Synthesis, prompt))
                .await
                .map_err(EngineError::reasoning)?
                .trim()
                .to_string()
        };

        let synthesis = Synthesis {
            content,
            source_count: findings.total_sources,
            created_at: Utc::now(),
        };
        scope.put(SYNTHESIS_KEY, &synthesis).await?;
        Ok(synthesis)
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Outline, then stream version 1. Nothing is stored if the draft fails.
    #[tracing::instrument(skip_all, fields(session = %session.id))]
    pub async fn generate(&self, session: &Session, scope: &SessionScope, events: &EventSink) -> EngineResult<ContentVersion> {
        events.status(Phase::Generating, "Creating outline").await;
        let research = self.research_context(scope).await?;
        let params = &session.parameters;
        let keywords = params.keywords.join(", ");
        let word_count = params.word_count.to_string();
        let custom = params.custom_instructions.as_deref().unwrap_or("");

        let prompt = prompts::render(
            prompts::OUTLINE,
            &[
                ("topic", session.topic.as_str()),
                ("content_type", params.content_type.as_str()),
                ("tone", params.tone.as_str()),
                ("audience", params.audience_level.as_str()),
                ("word_count", word_count.as_str()),
                ("keywords", prompts::or_none(&keywords)),
                ("custom_instructions", prompts::or_none(custom)),
                ("research", research.as_str()),
            ],
        );
        let outline = self
            .reasoning
            .generate(ReasoningRequest::new(ReasoningPurpose::Outline, prompt))
            .await
            .map_err(EngineError::reasoning)?
            .trim()
            .to_string();
        scope
            .put(
                OUTLINE_KEY,
                &Outline {
                    content: outline.clone(),
                    created_at: Utc::now(),
                },
            )
            .await?;
        events
            .emit(SessionEvent::Outline {
                content: outline.clone(),
            })
            .await;

        events.status(Phase::Generating, "Writing content").await;
        let prompt = prompts::render(
            prompts::DRAFT,
            &[
                ("content_type", params.content_type.as_str()),
                ("outline", outline.as_str()),
                ("research", research.as_str()),
                ("tone", params.tone.as_str()),
                ("audience", params.audience_level.as_str()),
                ("word_count", word_count.as_str()),
                ("keywords", prompts::or_none(&keywords)),
                ("custom_instructions", prompts::or_none(custom)),
            ],
        );
        let body = self
            .stream_body(ReasoningRequest::new(ReasoningPurpose::Draft, prompt), events)
            .await?;

        let version = ContentVersion::initial(body);
        scope.put(&ContentVersion::key(version.version), &version).await?;
        tracing::info!("Stored version 1 ({} words)", version.word_count());
        Ok(version)
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Apply `feedback` to the latest version and append the next one
    #[tracing::instrument(skip_all, fields(session = %session.id))]
    pub async fn iterate(
        &self,
        session: &Session,
        scope: &SessionScope,
        feedback: &str,
        events: &EventSink,
    ) -> EngineResult<ContentVersion> {
        events.status(Phase::Iterating, "Analyzing feedback").await;
        let latest = latest_version(scope).await?.ok_or_else(|| EngineError::KeyNotFound {
            session_id: session.id.clone(),
            key: format!("{}latest", VERSIONS_PREFIX),
        })?;

        let analysis = self.analyze_feedback(feedback, &latest).await?;
        events
            .emit(SessionEvent::Analysis {
                summary: analysis.summary(),
            })
            .await;

        let mut research = self.research_context(scope).await?;
        if analysis.action == FeedbackAction::ResearchMore {
            let tasks = self.feedback_tasks(&analysis, feedback);
            events
                .status(Phase::Researching, format!("Researching feedback with {} workers", tasks.len()))
                .await;
            let records = self.coordinator.run(scope, tasks, events).await;
            let extra = AggregatedFindings::from_records(records.iter());
            if !extra.is_empty() {
                let additional = extra
                    .summaries
                    .iter()
                    .map(|s| format!("## {}\n{}", s.objective, clip(&s.summary, RESEARCH_CONTEXT_CHARS)))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                research = format!("{}\n\n# Additional research\n\n{}", research, additional);
            }
        }

        events
            .status(Phase::Iterating, format!("Writing version {}", latest.version + 1))
            .await;
        let params = &session.parameters;
        let word_count = params.word_count.to_string();
        let changes = analysis.specific_changes.join("\n- ");
        let sections = analysis.sections_affected.join(", ");
        let prompt = prompts::render(
            prompts::REVISE,
            &[
                ("content", latest.content.as_str()),
                ("feedback", feedback),
                ("action", analysis.action.as_str()),
                ("changes", prompts::or_none(&changes)),
                ("sections", prompts::or_none(&sections)),
                ("research", research.as_str()),
                ("tone", params.tone.as_str()),
                ("audience", params.audience_level.as_str()),
                ("word_count", word_count.as_str()),
            ],
        );
        let body = self
            .stream_body(ReasoningRequest::new(ReasoningPurpose::Revise, prompt), events)
            .await?;

        let version = latest.next(body, feedback);
        scope.put(&ContentVersion::key(version.version), &version).await?;
        tracing::info!("Stored version {} ({} words)", version.version, version.word_count());
        Ok(version)
    }

    async fn analyze_feedback(&self, feedback: &str, latest: &ContentVersion) -> EngineResult<FeedbackAnalysis> {
        let prompt = prompts::render(
            prompts::ANALYZE_FEEDBACK,
            &[
                ("feedback", feedback),
                ("content", clip(&latest.content, ANALYSIS_EXCERPT_CHARS)),
            ],
        );
        let reply = self
            .reasoning
            .generate(
                ReasoningRequest::new(ReasoningPurpose::AnalyzeFeedback, prompt)
                    .with_schema_for::<FeedbackAnalysis>(),
            )
            .await
            .map_err(EngineError::reasoning)?;

        Ok(parse_structured(&reply).unwrap_or_else(|e| {
            tracing::warn!("Unusable feedback analysis ({:#}), treating as a section edit", e);
            FeedbackAnalysis::fallback(feedback)
        }))
    }

    /// Small batch for a `research_more` request
    fn feedback_tasks(&self, analysis: &FeedbackAnalysis, feedback: &str) -> Vec<WorkerTask> {
        let queries: Vec<String> = if analysis.research_queries.is_empty() {
            vec![clip(feedback, 120).to_string()]
        } else {
            analysis.research_queries.clone()
        };

        queries
            .into_iter()
            .filter(|q| !q.trim().is_empty())
            .take(self.config.follow_up_tasks.max(1))
            .map(|q| {
                WorkerTask::new(
                    format!("Research for revision: {}", q),
                    vec![q.clone(), format!("{} examples", q), format!("{} details", q)],
                )
                .with_max_sources(3)
            })
            .collect()
    }

    /// Synthesis plus per-worker summaries, as prompt context
    async fn research_context(&self, scope: &SessionScope) -> EngineResult<String> {
        let synthesis = scope
            .get_optional::<Synthesis>(SYNTHESIS_KEY)
            .await?
            .map(|s| s.content)
            .unwrap_or_else(|| EMPTY_SYNTHESIS.to_string());
        let findings = scope.aggregate(RESEARCH_PREFIX).await?;

        let mut context = format!("# Research synthesis\n\n{}", synthesis);
        if !findings.sources.is_empty() {
            let sources = findings
                .sources
                .iter()
                .map(|s| format!("- {}: {}", s.title, s.url))
                .collect::<Vec<_>>()
                .join("\n");
            context.push_str(&format!("\n\n# Sources\n\n{}", sources));
        }
        Ok(context)
    }

    /// Stream a reply, emitting every non-empty chunk as a `content` event.
    /// The returned body is exactly the concatenation of emitted chunks.
    async fn stream_body(&self, request: ReasoningRequest, events: &EventSink) -> EngineResult<String> {
        let purpose = request.purpose;
        let mut stream = self.reasoning.stream(request).await.map_err(EngineError::reasoning)?;

        let mut body = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(EngineError::reasoning)?;
            if chunk.is_empty() {
                continue;
            }
            body.push_str(&chunk);
            events.emit(SessionEvent::Content { chunk }).await;
        }

        if body.trim().is_empty() {
            return Err(EngineError::Reasoning(format!("{} produced no content", purpose)));
        }
        Ok(body)
    }
}

fn fallback_task(topic: &str) -> PlannedTask {
    PlannedTask {
        objective: format!("Research key information about {}", topic),
        search_queries: vec![
            topic.to_string(),
            format!("{} guide", topic),
            format!("{} best practices", topic),
            format!("{} examples", topic),
        ],
        tool_guidance: String::new(),
    }
}

fn padding_task(topic: &str, angle: &str) -> PlannedTask {
    PlannedTask {
        objective: format!("Research {} of {}", angle, topic),
        search_queries: vec![
            format!("{} {}", topic, angle),
            format!("{} {} guide", topic, angle),
            format!("{} {} examples", topic, angle),
        ],
        tool_guidance: String::new(),
    }
}

fn to_worker_task(planned: PlannedTask, max_queries: usize, max_sources: usize) -> WorkerTask {
    let mut queries: Vec<String> = planned
        .search_queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(max_queries.max(1))
        .collect();
    if queries.is_empty() {
        queries.push(planned.objective.clone());
    }
    WorkerTask::new(planned.objective, queries)
        .with_max_sources(max_sources)
        .with_guidance(planned.tool_guidance)
}
