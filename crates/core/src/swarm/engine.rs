//! # Session Engine
//!
//! The caller-facing surface. Owns every Session record, gates each
//! operation through the state machine, and runs long operations in the
//! background while the caller consumes their [`EventStream`].
//!
//! ```text
//! caller ── start_research ──→ begin() ──→ spawn ──→ LeadOrchestrator ──→ finish()
//!    ↑                                         │                            │
//!    └──────────── EventStream ←── EventSink ←─┴──── complete/revert + terminal event
//! ```
//!
//! Operations on one session are serialized by a per-session lock that is
//! held only while validating and committing status, never for the whole
//! run. Deleting a session aborts whatever is in flight for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::coordinator::Coordinator;
use super::events::{self, EventSink, EventStream, Phase, SessionEvent};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::memory::{AggregatedFindings, FindingsRecord, MemoryStore, SessionScope, RESEARCH_PREFIX};
use crate::skills::orchestrator_skill::{
    latest_version, version_numbers, LeadOrchestrator, ResearchPlan, Synthesis, PLAN_KEY,
    SYNTHESIS_KEY, VERSIONS_PREFIX,
};
use crate::skills::researcher_skill::ResearchWorker;
use crate::state::machine;
use crate::state::{
    ContentVersion, GenerationParameters, InMemorySessionStore, Operation, Session, SessionStore,
};
use crate::tools::scrape::extraction_from_env;
use crate::tools::search::discovery_from;
use crate::tools::{
    DiscoveryService, ExtractionService, HttpPublisher, HttpReasoningService, PublishDocument,
    PublishReceipt, PublishTarget, PublishingSink, ReasoningService,
};

/// Memory key mirroring the Session record
pub const SESSION_KEY: &str = "session";

/// How long delete waits for a slow stream to accept its final event
const DELETE_NOTICE_TIMEOUT: Duration = Duration::from_secs(2);

/// The external collaborators an engine talks to
#[derive(Clone)]
pub struct Services {
    pub reasoning: Arc<dyn ReasoningService>,
    pub discovery: Arc<dyn DiscoveryService>,
    pub extraction: Arc<dyn ExtractionService>,
    pub publisher: Arc<dyn PublishingSink>,
}

impl Services {
    /// Real HTTP clients for everything, as configured
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        Ok(Self {
            reasoning: Arc::new(HttpReasoningService::new(config.models.clone())),
            discovery: Arc::from(discovery_from(&config.discovery)?),
            extraction: Arc::from(extraction_from_env()?),
            publisher: Arc::new(HttpPublisher::new(config.export_dir())),
        })
    }
}

/// Stored under `publish/<kind>` after a successful publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub version: u32,
    pub receipt: PublishReceipt,
    pub published_at: DateTime<Utc>,
}

/// A streaming operation waiting to be spawned
enum Job {
    Research,
    Generate,
    Iterate { feedback: String },
}

impl Job {
    fn operation(&self) -> Operation {
        match self {
            Job::Research => Operation::StartResearch,
            Job::Generate => Operation::StartGeneration,
            Job::Iterate { .. } => Operation::Iterate,
        }
    }
}

struct InFlight {
    operation: Operation,
    handle: JoinHandle<()>,
    events: EventSink,
}

struct EngineInner {
    config: Arc<EngineConfig>,
    sessions: Arc<dyn SessionStore>,
    memory: Arc<dyn MemoryStore>,
    lead: LeadOrchestrator,
    publisher: Arc<dyn PublishingSink>,
    scopes: Mutex<HashMap<String, SessionScope>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

fn lock_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(format!("Lock error: {}", e))
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        sessions: Arc<dyn SessionStore>,
        memory: Arc<dyn MemoryStore>,
        services: Services,
    ) -> Self {
        let config = Arc::new(config);
        let worker = ResearchWorker::new(services.discovery, services.extraction, services.reasoning.clone())
            .with_max_extractions(config.max_extractions);
        let coordinator = Coordinator::new(Arc::new(worker), config.worker_timeout());
        let lead = LeadOrchestrator::new(services.reasoning, coordinator, config.clone());

        Self {
            inner: Arc::new(EngineInner {
                config,
                sessions,
                memory,
                lead,
                publisher: services.publisher,
                scopes: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Engine with the configured memory backend, an in-process session
    /// store and real external services
    pub fn from_config(config: EngineConfig) -> anyhow::Result<Self> {
        let memory = config.store.open()?;
        let services = Services::from_config(&config)?;
        Ok(Self::new(config, Arc::new(InMemorySessionStore::new()), memory, services))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ========================================================================
    // Session CRUD
    // ========================================================================

    pub async fn create(&self, topic: &str, parameters: GenerationParameters) -> EngineResult<Session> {
        let session = Session::new(topic, parameters)?;
        self.inner.sessions.insert(session.clone())?;
        let scope = self.scope_for(&session.id)?;
        scope.put(SESSION_KEY, &session).await?;
        tracing::info!("Created session {} for {:?}", session.id, session.topic);
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> EngineResult<Session> {
        self.inner.sessions.get(id)
    }

    pub fn list_sessions(&self) -> EngineResult<Vec<Session>> {
        self.inner.sessions.list()
    }

    /// Remove the session and its whole memory subtree. Anything running for
    /// it is aborted and its stream ends with an `error` event.
    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        let lock = self.session_lock(id)?;
        let _guard = lock.lock().await;

        self.inner.sessions.update(id, &mut |s| {
            s.status = machine::begin(s.status, Operation::Delete)?;
            Ok(())
        })?;

        let running = self.inner.in_flight.lock().map_err(lock_error)?.remove(id);
        if let Some(running) = running {
            tracing::info!("Aborting in-flight {} for session {}", running.operation, id);
            running.handle.abort();
            let _ = running.handle.await;
            let notice = running.events.emit(SessionEvent::Error {
                message: "session deleted".to_string(),
            });
            if tokio::time::timeout(DELETE_NOTICE_TIMEOUT, notice).await.is_err() {
                tracing::warn!("Stream for session {} stopped reading before the delete notice", id);
            }
        }

        let scope = self.scope_for(id)?;
        scope.close_and_clear().await?;
        self.inner.sessions.remove(id)?;
        self.inner.scopes.lock().map_err(lock_error)?.remove(id);
        self.inner.locks.lock().map_err(lock_error)?.remove(id);

        tracing::info!("Deleted session {}", id);
        Ok(())
    }

    // ========================================================================
    // Streaming operations
    // ========================================================================

    /// Classify, plan, fan out, synthesize. `created → ready_for_generation`.
    pub async fn start_research(&self, id: &str) -> EngineResult<EventStream> {
        self.launch(id, Job::Research).await
    }

    /// Outline and version 1. `ready_for_generation → ready_for_review`.
    pub async fn start_generation(&self, id: &str) -> EngineResult<EventStream> {
        self.launch(id, Job::Generate).await
    }

    /// Apply feedback as the next version. `ready_for_review → ready_for_review`.
    pub async fn iterate(&self, id: &str, feedback: &str) -> EngineResult<EventStream> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(EngineError::InvalidParameters("feedback must not be empty".to_string()));
        }
        self.launch(
            id,
            Job::Iterate {
                feedback: feedback.to_string(),
            },
        )
        .await
    }

    /// Validate, move to the in-flight status and spawn the job. The job
    /// does not start until it is registered as in flight.
    async fn launch(&self, id: &str, job: Job) -> EngineResult<EventStream> {
        let operation = job.operation();
        let lock = self.session_lock(id)?;
        let _guard = lock.lock().await;

        let session = self.inner.sessions.update(id, &mut |s| {
            s.status = machine::begin(s.status, operation)?;
            Ok(())
        })?;
        let scope = self.scope_for(id)?;
        self.mirror(&scope, &session).await;
        tracing::info!("Session {} is {}", id, session.status);

        let (events, stream) = events::channel(self.inner.config.event_buffer);
        let (go_tx, go_rx) = oneshot::channel::<()>();
        let engine = self.clone();
        let job_events = events.clone();

        let handle = tokio::spawn(async move {
            if go_rx.await.is_err() {
                return;
            }
            let result = engine.drive(job, &session, &scope, &job_events).await;
            engine.finish(&session.id, operation, result, &job_events).await;
        });

        self.inner.in_flight.lock().map_err(lock_error)?.insert(
            id.to_string(),
            InFlight {
                operation,
                handle,
                events,
            },
        );
        let _ = go_tx.send(());
        Ok(stream)
    }

    /// Run the job and produce its `complete` summary
    async fn drive(&self, job: Job, session: &Session, scope: &SessionScope, events: &EventSink) -> EngineResult<String> {
        let lead = &self.inner.lead;
        match job {
            Job::Research => {
                events.status(Phase::Analyzing, "Analyzing topic complexity").await;
                let complexity = match session.complexity {
                    Some(cached) => cached,
                    None => {
                        let complexity = lead.classify(session).await?;
                        let updated = self.inner.sessions.update(&session.id, &mut |s| {
                            s.complexity = Some(complexity);
                            Ok(())
                        })?;
                        self.mirror(scope, &updated).await;
                        complexity
                    }
                };
                events.emit(SessionEvent::Complexity { complexity }).await;

                let outcome = lead.research(session, complexity, scope, events).await?;
                Ok(outcome.summary())
            }
            Job::Generate => {
                let version = lead.generate(session, scope, events).await?;
                Ok(format!("Generated version {} ({} words)", version.version, version.word_count()))
            }
            Job::Iterate { feedback } => {
                let version = lead.iterate(session, scope, &feedback, events).await?;
                Ok(format!("Generated version {} ({} words)", version.version, version.word_count()))
            }
        }
    }

    /// Commit or roll back the status, then send the terminal event
    async fn finish(&self, id: &str, operation: Operation, result: EngineResult<String>, events: &EventSink) {
        let lock = match self.session_lock(id) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::error!("Cannot finish {} for {}: {}", operation, id, e);
                return;
            }
        };
        let _guard = lock.lock().await;

        let registered = match self.inner.in_flight.lock() {
            Ok(mut in_flight) => in_flight.remove(id).is_some(),
            Err(e) => {
                tracing::error!("Lock error: {}", e);
                false
            }
        };
        if !registered {
            // Deleted while finishing
            return;
        }

        let transition = if result.is_ok() {
            machine::complete
        } else {
            machine::revert
        };
        let settled = self.inner.sessions.update(id, &mut |s| {
            s.status = transition(s.status, operation)?;
            Ok(())
        });
        match settled {
            Ok(session) => {
                if let Ok(scope) = self.scope_for(id) {
                    self.mirror(&scope, &session).await;
                }
                tracing::info!("Session {} is {}", id, session.status);
            }
            Err(e) => tracing::error!("Could not settle {} for {}: {}", operation, id, e),
        }

        let terminal = match result {
            Ok(result_summary) => SessionEvent::Complete { result_summary },
            Err(e) => {
                tracing::warn!("{} failed for session {}: {}", operation, id, e);
                SessionEvent::Error { message: e.to_string() }
            }
        };
        events.emit(terminal).await;
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Hand the latest version to the publishing sink. A sink failure leaves
    /// the session in `ready_for_review`.
    pub async fn publish(&self, id: &str, target: PublishTarget) -> EngineResult<PublishReceipt> {
        let lock = self.session_lock(id)?;
        let _guard = lock.lock().await;

        let session = self.inner.sessions.get(id)?;
        machine::begin(session.status, Operation::Publish)?;
        let scope = self.scope_for(id)?;
        let latest = latest_version(&scope).await?.ok_or_else(|| EngineError::KeyNotFound {
            session_id: id.to_string(),
            key: VERSIONS_PREFIX.to_string(),
        })?;

        let document = PublishDocument::new(latest.content.clone(), latest.version, &session.topic);
        tracing::info!("Publishing version {} of {} to {}", latest.version, id, target.kind());
        let receipt = self
            .inner
            .publisher
            .publish(&document, &target)
            .await
            .map_err(EngineError::publishing)?;

        let record = PublishRecord {
            version: latest.version,
            receipt: receipt.clone(),
            published_at: Utc::now(),
        };
        scope.put(&format!("publish/{}", target.kind()), &record).await?;

        let session = self.inner.sessions.update(id, &mut |s| {
            s.status = machine::begin(s.status, Operation::Publish)?;
            Ok(())
        })?;
        self.mirror(&scope, &session).await;
        Ok(receipt)
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    /// Aggregated view over every Findings Record of the session
    pub async fn research_results(&self, id: &str) -> EngineResult<AggregatedFindings> {
        self.existing_scope(id)?.aggregate(RESEARCH_PREFIX).await
    }

    /// Raw Findings Records, error records included
    pub async fn findings(&self, id: &str) -> EngineResult<Vec<FindingsRecord>> {
        self.existing_scope(id)?.findings(RESEARCH_PREFIX).await
    }

    pub async fn synthesis(&self, id: &str) -> EngineResult<Synthesis> {
        self.existing_scope(id)?.get(SYNTHESIS_KEY).await
    }

    pub async fn research_plan(&self, id: &str) -> EngineResult<ResearchPlan> {
        self.existing_scope(id)?.get(PLAN_KEY).await
    }

    pub async fn version(&self, id: &str, version: u32) -> EngineResult<ContentVersion> {
        self.existing_scope(id)?
            .get_optional(&ContentVersion::key(version))
            .await?
            .ok_or_else(|| EngineError::VersionNotFound {
                session_id: id.to_string(),
                version,
            })
    }

    /// Every version, ascending
    pub async fn versions(&self, id: &str) -> EngineResult<Vec<ContentVersion>> {
        let scope = self.existing_scope(id)?;
        let mut versions = Vec::new();
        for n in version_numbers(&scope).await? {
            versions.push(scope.get(&ContentVersion::key(n)).await?);
        }
        Ok(versions)
    }

    pub async fn latest_version(&self, id: &str) -> EngineResult<ContentVersion> {
        latest_version(&self.existing_scope(id)?)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound {
                session_id: id.to_string(),
                key: VERSIONS_PREFIX.to_string(),
            })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn scope_for(&self, id: &str) -> EngineResult<SessionScope> {
        let mut scopes = self.inner.scopes.lock().map_err(lock_error)?;
        Ok(scopes
            .entry(id.to_string())
            .or_insert_with(|| SessionScope::new(id, self.inner.memory.clone()))
            .clone())
    }

    /// Scope of a session that must exist
    fn existing_scope(&self, id: &str) -> EngineResult<SessionScope> {
        self.inner.sessions.get(id)?;
        self.scope_for(id)
    }

    /// Operation lock of a session that must exist
    fn session_lock(&self, id: &str) -> EngineResult<Arc<tokio::sync::Mutex<()>>> {
        self.inner.sessions.get(id)?;
        let mut locks = self.inner.locks.lock().map_err(lock_error)?;
        Ok(locks.entry(id.to_string()).or_default().clone())
    }

    /// Keep the `session` key in step with the live record
    async fn mirror(&self, scope: &SessionScope, session: &Session) {
        if let Err(e) = scope.put(SESSION_KEY, session).await {
            tracing::warn!("Could not mirror session {}: {}", session.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::models::ReasoningPurpose;
    use crate::state::SessionStatus;
    use crate::testing::{FakeDiscovery, FakeExtraction, RecordingPublisher, ScriptedReasoning, DRAFT_CHUNKS};
    use futures::StreamExt;
    use std::time::Duration;

    struct Fixture {
        engine: Engine,
        reasoning: Arc<ScriptedReasoning>,
        memory: Arc<InMemoryStore>,
        publisher: Arc<RecordingPublisher>,
    }

    fn fixture_with(reasoning: ScriptedReasoning, discovery: FakeDiscovery, publisher: RecordingPublisher) -> Fixture {
        fixture_configured(EngineConfig::default(), reasoning, discovery, publisher)
    }

    fn fixture_configured(
        config: EngineConfig,
        reasoning: ScriptedReasoning,
        discovery: FakeDiscovery,
        publisher: RecordingPublisher,
    ) -> Fixture {
        let reasoning = Arc::new(reasoning);
        let memory = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(publisher);
        let services = Services {
            reasoning: reasoning.clone(),
            discovery: Arc::new(discovery),
            extraction: Arc::new(FakeExtraction::default()),
            publisher: publisher.clone(),
        };
        let engine = Engine::new(config, Arc::new(InMemorySessionStore::new()), memory.clone(), services);
        Fixture {
            engine,
            reasoning,
            memory,
            publisher,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedReasoning::new(), FakeDiscovery::new(2), RecordingPublisher::default())
    }

    async fn collect(stream: EventStream) -> Vec<SessionEvent> {
        stream.collect().await
    }

    fn names(events: &[SessionEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.name()).collect()
    }

    async fn created(f: &Fixture) -> String {
        f.engine
            .create("WebAssembly", GenerationParameters::default())
            .await
            .unwrap()
            .id
    }

    async fn reviewed(f: &Fixture) -> String {
        let id = created(f).await;
        collect(f.engine.start_research(&id).await.unwrap()).await;
        collect(f.engine.start_generation(&id).await.unwrap()).await;
        id
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let f = fixture();
        let err = f.engine.create("  ", GenerationParameters::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));

        let params = GenerationParameters::default().with_word_count(100);
        let err = f.engine.create("Rust", params).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));
        assert!(f.engine.list_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_iterate_on_created_is_rejected() {
        let f = fixture();
        let id = created(&f).await;

        let err = f.engine.iterate(&id, "More detail").await.unwrap_err();
        match err {
            EngineError::InvalidTransition {
                operation,
                required,
                actual,
            } => {
                assert_eq!(operation, Operation::Iterate);
                assert_eq!(required, "ready_for_review");
                assert_eq!(actual, SessionStatus::Created);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::Created);
    }

    #[tokio::test]
    async fn test_research_event_sequence() {
        let f = fixture();
        let id = created(&f).await;

        let events = collect(f.engine.start_research(&id).await.unwrap()).await;
        assert_eq!(
            names(&events),
            vec![
                "status",
                "complexity",
                "status",
                "plan",
                "status",
                "progress",
                "progress",
                "progress",
                "status",
                "complete"
            ]
        );
        assert_eq!(
            events[0],
            SessionEvent::status(Phase::Analyzing, "Analyzing topic complexity")
        );

        let session = f.engine.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::ReadyForGeneration);
        assert_eq!(session.complexity, Some(crate::state::Complexity::Moderate));

        let mirrored: Session = f.engine.scope_for(&id).unwrap().get(SESSION_KEY).await.unwrap();
        assert_eq!(mirrored.status, SessionStatus::ReadyForGeneration);
    }

    #[tokio::test]
    async fn test_moderate_tolerates_one_failed_worker() {
        let f = fixture_with(
            ScriptedReasoning::new(),
            FakeDiscovery::new(2).failing_queries_containing("market"),
            RecordingPublisher::default(),
        );
        let id = created(&f).await;
        let events = collect(f.engine.start_research(&id).await.unwrap()).await;

        assert!(events.contains(&SessionEvent::Plan { task_count: 3 }));
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Complete {
                result_summary: "Synthesized 6 sources from 2 of 3 workers".to_string()
            })
        );

        let findings = f.engine.findings(&id).await.unwrap();
        assert_eq!(findings.len(), 3);
        assert_eq!(findings.iter().filter(|r| !r.is_success()).count(), 1);

        let aggregated = f.engine.research_results(&id).await.unwrap();
        let expected: usize = findings.iter().map(|r| r.sources().len()).sum();
        assert_eq!(aggregated.total_sources, expected);
        assert_eq!(aggregated.error_count, 1);
        assert_eq!(f.engine.research_plan(&id).await.unwrap().tasks.len(), 3);
        assert_eq!(f.engine.synthesis(&id).await.unwrap().source_count, 6);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let f = fixture_with(
            ScriptedReasoning::new().reply(ReasoningPurpose::Classify, "COMPLEX"),
            FakeDiscovery::new(2),
            RecordingPublisher::default(),
        );
        let id = created(&f).await;
        let events = collect(f.engine.start_research(&id).await.unwrap()).await;

        let progress: Vec<(usize, usize)> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Progress { completed, total } => Some((*completed, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 5);
        assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(progress.iter().all(|(completed, total)| completed <= total && *total == 5));
    }

    #[tokio::test]
    async fn test_generate_twice_is_rejected() {
        let f = fixture();
        let id = created(&f).await;
        collect(f.engine.start_research(&id).await.unwrap()).await;

        let events = collect(f.engine.start_generation(&id).await.unwrap()).await;
        assert_eq!(events.last().map(|e| e.name()), Some("complete"));
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::ReadyForReview);

        let err = f.engine.start_generation(&id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::ReadyForReview);
    }

    #[tokio::test]
    async fn test_generation_chunks_equal_version_body() {
        let f = fixture();
        let id = created(&f).await;
        collect(f.engine.start_research(&id).await.unwrap()).await;

        let events = collect(f.engine.start_generation(&id).await.unwrap()).await;
        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Content { chunk } => Some(chunk.as_str()),
                _ => None,
            })
            .collect();

        let v1 = f.engine.version(&id, 1).await.unwrap();
        assert_eq!(streamed, v1.content);
        assert_eq!(v1.content, DRAFT_CHUNKS.concat());
        assert!(v1.feedback_applied.is_none());
        assert_eq!(events.last(), Some(&SessionEvent::Complete {
            result_summary: "Generated version 1 (4 words)".to_string()
        }));
    }

    #[tokio::test]
    async fn test_two_iterations_make_three_versions() {
        let f = fixture();
        let id = reviewed(&f).await;
        let v1 = f.engine.version(&id, 1).await.unwrap();

        for feedback in ["Shorter intro", "Add a conclusion"] {
            let events = collect(f.engine.iterate(&id, feedback).await.unwrap()).await;
            assert!(events.iter().any(|e| e.name() == "analysis"));
            assert_eq!(events.last().map(|e| e.name()), Some("complete"));
        }

        let versions = f.engine.versions(&id).await.unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(versions[1].feedback_applied.as_deref(), Some("Shorter intro"));
        assert_eq!(versions[2].feedback_applied.as_deref(), Some("Add a conclusion"));
        assert_eq!(f.engine.version(&id, 1).await.unwrap(), v1);
        assert_eq!(f.engine.latest_version(&id).await.unwrap().version, 3);
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::ReadyForReview);

        let missing = f.engine.version(&id, 9).await.unwrap_err();
        assert!(matches!(missing, EngineError::VersionNotFound { version: 9, .. }));
    }

    #[tokio::test]
    async fn test_empty_feedback_is_rejected() {
        let f = fixture();
        let id = reviewed(&f).await;
        let err = f.engine.iterate(&id, "   ").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_reasoning_failure_reverts_status() {
        let f = fixture_with(
            ScriptedReasoning::new().failing(ReasoningPurpose::Synthesis),
            FakeDiscovery::new(2),
            RecordingPublisher::default(),
        );
        let id = created(&f).await;

        let events = collect(f.engine.start_research(&id).await.unwrap()).await;
        assert!(matches!(events.last(), Some(SessionEvent::Error { .. })));
        assert!(!events.iter().any(|e| e.name() == "complete"));
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::Created);

        // Retry is legal and classification is not repeated
        let events = collect(f.engine.start_research(&id).await.unwrap()).await;
        assert!(matches!(events.last(), Some(SessionEvent::Error { .. })));
        assert_eq!(f.reasoning.count(ReasoningPurpose::Classify), 1);
    }

    #[tokio::test]
    async fn test_research_retry_starts_from_clean_findings() {
        let f = fixture_with(
            ScriptedReasoning::new().failing_once(ReasoningPurpose::Synthesis),
            FakeDiscovery::new(2),
            RecordingPublisher::default(),
        );
        let id = created(&f).await;

        let first = collect(f.engine.start_research(&id).await.unwrap()).await;
        assert!(matches!(first.last(), Some(SessionEvent::Error { .. })));
        assert_eq!(f.engine.findings(&id).await.unwrap().len(), 3);
        assert!(f.engine.synthesis(&id).await.unwrap_err().is_not_found());

        let second = collect(f.engine.start_research(&id).await.unwrap()).await;
        assert_eq!(
            second.last(),
            Some(&SessionEvent::Complete {
                result_summary: "Synthesized 9 sources from 3 of 3 workers".to_string()
            })
        );

        let plan = f.engine.research_plan(&id).await.unwrap();
        let findings = f.engine.findings(&id).await.unwrap();
        assert_eq!(findings.len(), plan.tasks.len());
        let aggregated = f.engine.research_results(&id).await.unwrap();
        assert_eq!(aggregated.record_count, 3);
        assert_eq!(aggregated.total_sources, 9);
        assert_eq!(f.engine.synthesis(&id).await.unwrap().source_count, 9);
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_ready_for_generation() {
        let f = fixture_with(
            ScriptedReasoning::new().failing(ReasoningPurpose::Draft),
            FakeDiscovery::new(2),
            RecordingPublisher::default(),
        );
        let id = created(&f).await;
        collect(f.engine.start_research(&id).await.unwrap()).await;

        let events = collect(f.engine.start_generation(&id).await.unwrap()).await;
        assert!(matches!(events.last(), Some(SessionEvent::Error { .. })));
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::ReadyForGeneration);
        assert!(f.engine.versions(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_rejected_while_research_runs() {
        let f = fixture_with(
            ScriptedReasoning::new(),
            FakeDiscovery::new(2).delayed(Duration::from_secs(30)),
            RecordingPublisher::default(),
        );
        let id = created(&f).await;
        let _stream = f.engine.start_research(&id).await.unwrap();

        assert!(matches!(
            f.engine.start_research(&id).await.unwrap_err(),
            EngineError::InvalidTransition { .. }
        ));
        assert!(matches!(
            f.engine.start_generation(&id).await.unwrap_err(),
            EngineError::InvalidTransition { .. }
        ));
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::Researching);
        f.engine.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_mid_research_clears_memory() {
        let f = fixture_with(
            ScriptedReasoning::new(),
            FakeDiscovery::new(2).delayed(Duration::from_secs(30)),
            RecordingPublisher::default(),
        );
        let id = created(&f).await;
        let mut stream = f.engine.start_research(&id).await.unwrap();

        // Wait until the workers are running
        while let Some(event) = stream.next().await {
            if event == SessionEvent::status(Phase::Researching, "Running 3 research workers") {
                break;
            }
        }
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::Researching);
        assert!(f.memory.get(&id, PLAN_KEY).await.unwrap().is_some());

        f.engine.delete(&id).await.unwrap();

        let rest: Vec<SessionEvent> = stream.collect().await;
        assert_eq!(
            rest.last(),
            Some(&SessionEvent::Error {
                message: "session deleted".to_string()
            })
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        for key in [SESSION_KEY, PLAN_KEY, SYNTHESIS_KEY] {
            assert!(f.memory.get(&id, key).await.unwrap().is_none());
        }
        assert!(f.memory.list_keys(&id, "").await.unwrap().is_empty());
        assert!(matches!(f.engine.get_session(&id), Err(EngineError::SessionNotFound(_))));
        assert!(matches!(
            f.engine.research_results(&id).await,
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_notice_reaches_a_full_stream() {
        let config = EngineConfig {
            event_buffer: 2,
            ..EngineConfig::default()
        };
        let f = fixture_configured(
            config,
            ScriptedReasoning::new(),
            FakeDiscovery::new(2).delayed(Duration::from_secs(30)),
            RecordingPublisher::default(),
        );
        let id = created(&f).await;
        let stream = f.engine.start_research(&id).await.unwrap();

        // Nobody reads, so the job stalls on the third event
        tokio::time::sleep(Duration::from_millis(50)).await;
        let engine = f.engine.clone();
        let deleting = tokio::spawn({
            let id = id.clone();
            async move { engine.delete(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = collect(stream).await;
        deleting.await.unwrap().unwrap();
        assert_eq!(names(&events), vec!["status", "complexity", "error"]);
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Error {
                message: "session deleted".to_string()
            })
        );
        assert!(matches!(f.engine.get_session(&id), Err(EngineError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_publish_export() {
        let f = fixture();
        let id = reviewed(&f).await;

        let receipt = f.engine.publish(&id, PublishTarget::Export).await.unwrap();
        assert!(matches!(receipt, PublishReceipt::Export { ref title, .. } if title == "Title"));
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::Published);

        let published = f.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].version, 1);

        let record: PublishRecord = f.engine.scope_for(&id).unwrap().get("publish/export").await.unwrap();
        assert_eq!(record.receipt, receipt);

        let again = f.engine.publish(&id, PublishTarget::Export).await.unwrap_err();
        assert!(matches!(again, EngineError::InvalidTransition { .. }));

        // Deletion is legal from every live state
        f.engine.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_review_state() {
        let f = fixture_with(ScriptedReasoning::new(), FakeDiscovery::new(2), RecordingPublisher::failing());
        let id = reviewed(&f).await;

        let err = f.engine.publish(&id, PublishTarget::Export).await.unwrap_err();
        assert!(matches!(err, EngineError::Publishing(_)));
        assert_eq!(f.engine.get_session(&id).unwrap().status, SessionStatus::ReadyForReview);
    }

    #[tokio::test]
    async fn test_publish_before_review_is_rejected() {
        let f = fixture();
        let id = created(&f).await;
        let err = f.engine.publish(&id, PublishTarget::Export).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let f = fixture();
        assert!(matches!(
            f.engine.start_research("nope").await.unwrap_err(),
            EngineError::SessionNotFound(_)
        ));
        assert!(f.engine.delete("nope").await.unwrap_err().is_not_found());
        assert!(matches!(
            f.engine.publish("nope", PublishTarget::Export).await.unwrap_err(),
            EngineError::SessionNotFound(_)
        ));
        assert!(f.engine.inner.locks.lock().unwrap().is_empty());

        // A deleted session leaves no lock behind either
        let id = created(&f).await;
        f.engine.delete(&id).await.unwrap();
        assert!(f.engine.start_research(&id).await.unwrap_err().is_not_found());
        assert!(f.engine.inner.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_stream_does_not_stop_the_operation() {
        let f = fixture();
        let id = created(&f).await;
        drop(f.engine.start_research(&id).await.unwrap());

        for _ in 0..100 {
            if f.engine.get_session(&id).unwrap().status == SessionStatus::ReadyForGeneration {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("research did not finish after the caller stopped listening");
    }
}
