//! # Session Records
//!
//! The Session, its generation parameters, the complexity classification
//! and the immutable Content Version snapshots produced for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::machine::SessionStatus;
use crate::error::{EngineError, EngineResult};

pub const MIN_WORD_COUNT: u32 = 500;
pub const MAX_WORD_COUNT: u32 = 5000;

/// Category of content to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    BlogPost,
    TechnicalTutorial,
    MarketingContent,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlogPost => "blog post",
            Self::TechnicalTutorial => "technical tutorial",
            Self::MarketingContent => "marketing content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Technical,
    Friendly,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Professional => "professional",
            Self::Casual => "casual",
            Self::Technical => "technical",
            Self::Friendly => "friendly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudienceLevel {
    Beginner,
    Intermediate,
    Expert,
    #[default]
    General,
}

impl AudienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Expert => "expert",
            Self::General => "general",
        }
    }
}

fn default_word_count() -> u32 {
    1500
}

/// How the content should be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParameters {
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub audience_level: AudienceLevel,
    #[serde(default = "default_word_count")]
    pub word_count: u32,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            content_type: ContentType::default(),
            tone: Tone::default(),
            audience_level: AudienceLevel::default(),
            word_count: default_word_count(),
            keywords: Vec::new(),
            custom_instructions: None,
        }
    }
}

impl GenerationParameters {
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_word_count(mut self, word_count: u32) -> Self {
        self.word_count = word_count;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(MIN_WORD_COUNT..=MAX_WORD_COUNT).contains(&self.word_count) {
            return Err(EngineError::InvalidParameters(format!(
                "word_count must be between {} and {}, got {}",
                MIN_WORD_COUNT, MAX_WORD_COUNT, self.word_count
            )));
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(EngineError::InvalidParameters(
                "keywords must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Topic complexity, which sizes the research fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }

    /// Read a classification out of a free-text reply.
    /// Anything unrecognised counts as moderate.
    pub fn from_response(text: &str) -> Self {
        let upper = text.trim().to_uppercase();
        let first = upper
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|w| !w.is_empty())
            .unwrap_or("");
        match first {
            "SIMPLE" => Self::Simple,
            "COMPLEX" => Self::Complex,
            "MODERATE" => Self::Moderate,
            _ if upper.contains("SIMPLE") => Self::Simple,
            _ if upper.contains("COMPLEX") => Self::Complex,
            _ => Self::Moderate,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub topic: String,
    pub parameters: GenerationParameters,
    pub status: SessionStatus,
    #[serde(default)]
    pub complexity: Option<Complexity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Build a fresh session in `created`, validating the inputs
    pub fn new(topic: impl Into<String>, parameters: GenerationParameters) -> EngineResult<Self> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(EngineError::InvalidParameters(
                "topic must not be empty".to_string(),
            ));
        }
        parameters.validate()?;

        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic,
            parameters,
            status: SessionStatus::Created,
            complexity: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One immutable, numbered snapshot of generated content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentVersion {
    pub version: u32,
    pub content: String,
    /// Feedback that produced this version. `None` only for version 1.
    pub feedback_applied: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl ContentVersion {
    pub fn initial(content: String) -> Self {
        Self {
            version: 1,
            content,
            feedback_applied: None,
            generated_at: Utc::now(),
        }
    }

    /// The version that follows `self` after applying `feedback`
    pub fn next(&self, content: String, feedback: impl Into<String>) -> Self {
        Self {
            version: self.version + 1,
            content,
            feedback_applied: Some(feedback.into()),
            generated_at: Utc::now(),
        }
    }

    /// Memory key this version is stored under
    pub fn key(version: u32) -> String {
        format!("versions/v{}", version)
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_created() {
        let session = Session::new("Rust async runtimes", GenerationParameters::default()).unwrap();
        assert_eq!(session.status, SessionStatus::Created);
        assert!(session.complexity.is_none());
        assert_eq!(session.parameters.word_count, 1500);
    }

    #[test]
    fn test_empty_topic_rejected() {
        let err = Session::new("   ", GenerationParameters::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));
    }

    #[test]
    fn test_word_count_bounds() {
        let too_short = GenerationParameters::default().with_word_count(100);
        assert!(Session::new("topic", too_short).is_err());

        let max = GenerationParameters::default().with_word_count(MAX_WORD_COUNT);
        assert!(Session::new("topic", max).is_ok());
    }

    #[test]
    fn test_complexity_parsing() {
        assert_eq!(Complexity::from_response("SIMPLE"), Complexity::Simple);
        assert_eq!(Complexity::from_response("complex."), Complexity::Complex);
        assert_eq!(Complexity::from_response(" Moderate\n"), Complexity::Moderate);
        assert_eq!(
            Complexity::from_response("I'd say this is complex"),
            Complexity::Complex
        );
        assert_eq!(Complexity::from_response("unsure"), Complexity::Moderate);
        assert_eq!(Complexity::from_response(""), Complexity::Moderate);
    }

    #[test]
    fn test_version_chain() {
        let v1 = ContentVersion::initial("# Title\n\nBody".to_string());
        assert_eq!(v1.version, 1);
        assert!(v1.feedback_applied.is_none());

        let v2 = v1.next("# Title\n\nBetter body".to_string(), "expand intro");
        assert_eq!(v2.version, 2);
        assert_eq!(v2.feedback_applied.as_deref(), Some("expand intro"));
        assert_eq!(ContentVersion::key(v2.version), "versions/v2");
    }

    #[test]
    fn test_parameters_deserialize_with_defaults() {
        let params: GenerationParameters =
            serde_json::from_str(r#"{"tone":"casual","keywords":["rust"]}"#).unwrap();
        assert_eq!(params.tone, Tone::Casual);
        assert_eq!(params.content_type, ContentType::BlogPost);
        assert_eq!(params.word_count, 1500);
    }
}
