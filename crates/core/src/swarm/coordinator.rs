//! # Fan-Out/Fan-In Coordinator
//!
//! Launches every Worker Task of a batch concurrently, waits for all of them
//! or the deadline, and returns one Findings Record per task in task order.
//!
//! ```text
//! tasks ──spawn──→ worker 1 ─┐
//!        ├─spawn──→ worker 2 ─┼──join_next──→ progress events ──→ records
//!        └─spawn──→ worker N ─┘      (deadline: unfinished → "timed out")
//! ```

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

use super::events::{EventSink, SessionEvent};
use crate::memory::{FindingsRecord, SessionScope};
use crate::skills::researcher_skill::{new_worker_id, ResearchWorker, WorkerTask};

pub struct Coordinator {
    worker: Arc<ResearchWorker>,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(worker: Arc<ResearchWorker>, timeout: Duration) -> Self {
        Self { worker, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `tasks` against `scope`. Never fails: worker errors, panics and
    /// timeouts all come back as error records.
    pub async fn run(
        &self,
        scope: &SessionScope,
        tasks: Vec<WorkerTask>,
        events: &EventSink,
    ) -> Vec<FindingsRecord> {
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }

        let deadline = Instant::now() + self.timeout;
        let roster: Vec<(String, String)> = tasks
            .iter()
            .map(|t| (new_worker_id(), t.objective.clone()))
            .collect();
        tracing::info!(
            "Launching {} research workers for session {}",
            total,
            scope.session_id()
        );

        let mut join_set = JoinSet::new();

        // SCATTER
        for (index, task) in tasks.into_iter().enumerate() {
            let worker = self.worker.clone();
            let scope = scope.clone();
            let worker_id = roster[index].0.clone();

            join_set.spawn(async move {
                let outcome = AssertUnwindSafe(worker.execute(&scope, &worker_id, &task))
                    .catch_unwind()
                    .await;
                let record = match outcome {
                    Ok(record) => record,
                    Err(_) => {
                        let record =
                            FindingsRecord::error(&worker_id, &task.objective, "worker panicked", 0);
                        persist(&scope, &record).await;
                        record
                    }
                };
                (index, record)
            });
        }

        // GATHER. Progress is emitted from here so `completed` is ordered.
        let mut slots: Vec<Option<FindingsRecord>> = vec![None; total];
        let mut completed = 0;
        loop {
            match timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((index, record)))) => {
                    slots[index] = Some(record);
                    completed += 1;
                    events
                        .emit(SessionEvent::Progress { completed, total })
                        .await;
                }
                Ok(Some(Err(e))) => tracing::warn!("Research worker task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Research batch hit its {:?} deadline with {}/{} done",
                        self.timeout,
                        completed,
                        total
                    );
                    join_set.abort_all();
                    // Unfinished tasks show up as completed < total
                    events
                        .emit(SessionEvent::Progress { completed, total })
                        .await;
                    break;
                }
            }
        }

        // Fill the gaps left by timeouts
        let mut records = Vec::with_capacity(total);
        for (slot, (worker_id, objective)) in slots.into_iter().zip(roster) {
            let record = match slot {
                Some(record) => record,
                None => {
                    let record = FindingsRecord::error(
                        &worker_id,
                        &objective,
                        format!("timed out after {:?}", self.timeout),
                        0,
                    );
                    persist(scope, &record).await;
                    record
                }
            };
            records.push(record);
        }

        let failed = records.iter().filter(|r| !r.is_success()).count();
        tracing::info!("Research batch done: {} ok, {} failed", total - failed, failed);
        records
    }
}

/// Write a record on behalf of a worker that could not
async fn persist(scope: &SessionScope, record: &FindingsRecord) {
    if let Err(e) = scope.put(&FindingsRecord::key(&record.worker_id), record).await {
        tracing::warn!("Could not store record for {}: {}", record.worker_id, e);
    }
}
