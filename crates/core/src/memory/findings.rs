//! # Findings Records
//!
//! The immutable output of one research worker, and the combined view the
//! Lead Orchestrator reads back through `aggregate`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix every Findings Record lives under
pub const RESEARCH_PREFIX: &str = "research/";

/// A discovered web source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
}

impl Source {
    pub fn new(url: impl Into<String>, title: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            excerpt: excerpt.into(),
        }
    }
}

/// Either a summary with its sources, or an error. Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FindingsOutcome {
    Success { summary: String, sources: Vec<Source> },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingsRecord {
    pub worker_id: String,
    /// Copied from the Worker Task so it outlives it
    pub objective: String,
    /// Discovery queries actually executed
    pub discovery_count: u32,
    pub completed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: FindingsOutcome,
}

impl FindingsRecord {
    pub fn success(
        worker_id: impl Into<String>,
        objective: impl Into<String>,
        summary: impl Into<String>,
        sources: Vec<Source>,
        discovery_count: u32,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            objective: objective.into(),
            discovery_count,
            completed_at: Utc::now(),
            outcome: FindingsOutcome::Success {
                summary: summary.into(),
                sources,
            },
        }
    }

    pub fn error(
        worker_id: impl Into<String>,
        objective: impl Into<String>,
        error: impl Into<String>,
        discovery_count: u32,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            objective: objective.into(),
            discovery_count,
            completed_at: Utc::now(),
            outcome: FindingsOutcome::Error {
                error: error.into(),
            },
        }
    }

    /// Memory key for the record written by `worker_id`
    pub fn key(worker_id: &str) -> String {
        format!("{}{}", RESEARCH_PREFIX, worker_id)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FindingsOutcome::Success { .. })
    }

    pub fn summary(&self) -> Option<&str> {
        match &self.outcome {
            FindingsOutcome::Success { summary, .. } => Some(summary),
            FindingsOutcome::Error { .. } => None,
        }
    }

    pub fn sources(&self) -> &[Source] {
        match &self.outcome {
            FindingsOutcome::Success { sources, .. } => sources,
            FindingsOutcome::Error { .. } => &[],
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            FindingsOutcome::Error { error } => Some(error),
            FindingsOutcome::Success { .. } => None,
        }
    }
}

/// One worker's contribution to the combined view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub objective: String,
    pub summary: String,
    pub source_count: usize,
}

/// Successful records merged into one view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFindings {
    pub summaries: Vec<WorkerSummary>,
    pub sources: Vec<Source>,
    pub total_sources: usize,
    /// Every record read, errors included
    pub record_count: usize,
    pub error_count: usize,
}

impl AggregatedFindings {
    /// Merge records. Error records are counted and otherwise discarded;
    /// successful records keep every source they carry.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a FindingsRecord>) -> Self {
        let mut view = Self::default();
        for record in records {
            view.record_count += 1;
            match &record.outcome {
                FindingsOutcome::Success { summary, sources } => {
                    view.summaries.push(WorkerSummary {
                        worker_id: record.worker_id.clone(),
                        objective: record.objective.clone(),
                        summary: summary.clone(),
                        source_count: sources.len(),
                    });
                    view.sources.extend(sources.iter().cloned());
                }
                FindingsOutcome::Error { .. } => view.error_count += 1,
            }
        }
        view.total_sources = view.sources.len();
        view
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_flat_with_status() {
        let record = FindingsRecord::success(
            "research_0a1b2c3d",
            "Find adoption data",
            "Adoption is growing",
            vec![Source::new("https://example.com", "Example", "snippet")],
            2,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["summary"], "Adoption is growing");
        assert!(json.get("error").is_none());

        let back: FindingsRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_error_record_has_no_sources() {
        let record = FindingsRecord::error("research_1", "obj", "timed out", 1);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("sources").is_none());
        assert!(record.sources().is_empty());
        assert_eq!(record.error_message(), Some("timed out"));
    }

    #[test]
    fn test_aggregate_counts_every_successful_source() {
        let records = vec![
            FindingsRecord::success(
                "a",
                "one",
                "s1",
                vec![
                    Source::new("https://a.dev/1", "A1", ""),
                    Source::new("https://a.dev/2", "A2", ""),
                ],
                2,
            ),
            FindingsRecord::error("b", "two", "boom", 0),
            FindingsRecord::success(
                "c",
                "three",
                "s3",
                vec![Source::new("https://a.dev/1", "A1 again", "")],
                1,
            ),
        ];

        let view = AggregatedFindings::from_records(&records);
        let expected: usize = records.iter().map(|r| r.sources().len()).sum();
        assert_eq!(view.total_sources, expected);
        assert_eq!(view.total_sources, 3);
        assert_eq!(view.record_count, 3);
        assert_eq!(view.error_count, 1);
        assert_eq!(view.summaries.len(), 2);
    }
}
