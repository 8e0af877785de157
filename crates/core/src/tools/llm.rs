//! # Reasoning Service
//!
//! The text-generation seam. Callers build a [`ReasoningRequest`] tagged
//! with its [`ReasoningPurpose`]; the service routes it to the configured
//! model and returns plain text, a token stream, or (via
//! [`generate_structured`]) a typed value validated against a JSON Schema.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::VecDeque;

use crate::models::{LlmProvider, ModelConfig, ModelSettings, ReasoningPurpose};

/// Incremental text produced by a streaming call
pub type TextStream = BoxStream<'static, Result<String>>;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub purpose: ReasoningPurpose,
    pub system: Option<String>,
    pub prompt: String,
    /// JSON Schema the reply must satisfy
    pub schema: Option<Value>,
}

impl ReasoningRequest {
    pub fn new(purpose: ReasoningPurpose, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            system: None,
            prompt: prompt.into(),
            schema: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_schema_for<T: JsonSchema>(mut self) -> Self {
        let schema = schemars::schema_for!(T);
        self.schema = serde_json::to_value(&schema).ok();
        self
    }

    /// Prompt text with the schema instruction appended
    fn rendered_prompt(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}\n\nRespond with a single JSON value matching this JSON Schema and nothing else:\n{}",
                self.prompt, schema
            ),
            None => self.prompt.clone(),
        }
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn generate(&self, request: ReasoningRequest) -> Result<String>;

    /// Stream the reply as it is produced
    async fn stream(&self, request: ReasoningRequest) -> Result<TextStream>;
}

/// Ask for a structured reply and decode it into `T`
pub async fn generate_structured<T>(
    service: &dyn ReasoningService,
    request: ReasoningRequest,
) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let text = service.generate(request.with_schema_for::<T>()).await?;
    parse_structured(&text)
}

/// Decode JSON out of a model reply, tolerating code fences and prose
/// around the value
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = strip_code_fence(text.trim());
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed
        .find(['{', '['])
        .ok_or_else(|| anyhow!("no JSON value in reply"))?;
    let close = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed
        .rfind(close)
        .filter(|end| *end > start)
        .ok_or_else(|| anyhow!("unterminated JSON value in reply"))?;

    serde_json::from_str(&trimmed[start..=end]).context("reply is not valid JSON for the schema")
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// HTTP client for Anthropic and OpenAI-compatible chat APIs
pub struct HttpReasoningService {
    client: reqwest::Client,
    settings: ModelSettings,
}

impl HttpReasoningService {
    pub fn new(settings: ModelSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn build(&self, request: &ReasoningRequest, streaming: bool) -> Result<reqwest::RequestBuilder> {
        let config = self.settings.for_purpose(request.purpose);
        let api_key = config.api_key()?;
        let prompt = request.rendered_prompt();
        tracing::debug!(
            "Reasoning call {} -> {:?}/{} (stream: {})",
            request.purpose,
            config.provider,
            config.model,
            streaming
        );

        let builder = match config.provider {
            LlmProvider::Anthropic => {
                let mut body = json!({
                    "model": config.model,
                    "max_tokens": request.purpose.max_tokens(),
                    "messages": [{ "role": "user", "content": prompt }],
                    "stream": streaming,
                });
                if let Some(system) = &request.system {
                    body["system"] = json!(system);
                }
                apply_temperature(&mut body, &config);
                self.client
                    .post(format!("{}/messages", config.endpoint()))
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
            }
            _ => {
                let mut messages = Vec::new();
                if let Some(system) = &request.system {
                    messages.push(json!({ "role": "system", "content": system }));
                }
                messages.push(json!({ "role": "user", "content": prompt }));
                let mut body = json!({
                    "model": config.model,
                    "max_tokens": request.purpose.max_tokens(),
                    "messages": messages,
                    "stream": streaming,
                });
                apply_temperature(&mut body, &config);
                self.client
                    .post(format!("{}/chat/completions", config.endpoint()))
                    .bearer_auth(api_key)
                    .json(&body)
            }
        };
        Ok(builder)
    }

    fn dialect(&self, purpose: ReasoningPurpose) -> Dialect {
        match self.settings.for_purpose(purpose).provider {
            LlmProvider::Anthropic => Dialect::Anthropic,
            _ => Dialect::OpenAi,
        }
    }
}

fn apply_temperature(body: &mut Value, config: &ModelConfig) {
    if let Some(t) = config.temperature {
        body["temperature"] = json!(t);
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("reasoning API returned {}: {}", status, body)
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn generate(&self, request: ReasoningRequest) -> Result<String> {
        let dialect = self.dialect(request.purpose);
        let response = self
            .build(&request, false)?
            .send()
            .await
            .with_context(|| format!("{} request failed", request.purpose))?;
        let body: Value = check_status(response).await?.json().await?;
        dialect.extract_reply(&body)
    }

    async fn stream(&self, request: ReasoningRequest) -> Result<TextStream> {
        let dialect = self.dialect(request.purpose);
        let response = self
            .build(&request, true)?
            .send()
            .await
            .with_context(|| format!("{} stream failed", request.purpose))?;
        let response = check_status(response).await?;
        Ok(sse_text_stream(response, dialect))
    }
}

/// Wire format of the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Anthropic,
    OpenAi,
}

/// One parsed `data:` line of a streaming reply
#[derive(Debug, PartialEq)]
enum StreamLine {
    Text(String),
    Done,
    Failed(String),
    Skip,
}

impl Dialect {
    fn extract_reply(&self, body: &Value) -> Result<String> {
        match self {
            Dialect::Anthropic => {
                let blocks = body["content"]
                    .as_array()
                    .ok_or_else(|| anyhow!("reply has no content blocks"))?;
                Ok(blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join(""))
            }
            Dialect::OpenAi => body["choices"][0]["message"]["content"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("reply has no message content")),
        }
    }

    fn parse_line(&self, line: &str) -> StreamLine {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return StreamLine::Skip;
        };
        if data == "[DONE]" {
            return StreamLine::Done;
        }
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            return StreamLine::Skip;
        };

        match self {
            Dialect::Anthropic => match event["type"].as_str() {
                Some("content_block_delta") => event["delta"]["text"]
                    .as_str()
                    .map(|t| StreamLine::Text(t.to_string()))
                    .unwrap_or(StreamLine::Skip),
                Some("message_stop") => StreamLine::Done,
                Some("error") => StreamLine::Failed(
                    event["error"]["message"]
                        .as_str()
                        .unwrap_or("stream error")
                        .to_string(),
                ),
                _ => StreamLine::Skip,
            },
            Dialect::OpenAi => {
                if let Some(message) = event["error"]["message"].as_str() {
                    return StreamLine::Failed(message.to_string());
                }
                event["choices"][0]["delta"]["content"]
                    .as_str()
                    .filter(|t| !t.is_empty())
                    .map(|t| StreamLine::Text(t.to_string()))
                    .unwrap_or(StreamLine::Skip)
            }
        }
    }
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    dialect: Dialect,
    done: bool,
}

impl SseState {
    /// Move every complete line out of the buffer
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            match self.dialect.parse_line(line.trim_end()) {
                StreamLine::Text(text) => self.pending.push_back(Ok(text)),
                StreamLine::Done => self.done = true,
                StreamLine::Failed(message) => {
                    self.pending.push_back(Err(anyhow!(message)));
                    self.done = true;
                }
                StreamLine::Skip => {}
            }
            if self.done {
                break;
            }
        }
    }
}

fn sse_text_stream(response: reqwest::Response, dialect: Dialect) -> TextStream {
    let state = SseState {
        body: response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        dialect,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(anyhow!("stream interrupted: {}", e)), state));
                }
                None => {
                    state.buffer.push(b'\n');
                    state.drain_lines();
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Pick {
        indices: Vec<usize>,
    }

    #[test]
    fn test_parse_structured_plain_and_fenced() {
        let plain: Pick = parse_structured(r#"{"indices":[0,2]}"#).unwrap();
        assert_eq!(plain.indices, vec![0, 2]);

        let fenced: Pick = parse_structured("```json\n{\"indices\": [1]}\n```").unwrap();
        assert_eq!(fenced.indices, vec![1]);

        let chatty: Pick =
            parse_structured("Sure! Here you go: {\"indices\": [3]} Hope that helps.").unwrap();
        assert_eq!(chatty.indices, vec![3]);
    }

    #[test]
    fn test_parse_structured_rejects_garbage() {
        assert!(parse_structured::<Pick>("no json here").is_err());
        assert!(parse_structured::<Pick>("{\"indices\": \"x\"}").is_err());
    }

    #[test]
    fn test_schema_is_attached() {
        let request =
            ReasoningRequest::new(ReasoningPurpose::Evaluate, "pick").with_schema_for::<Pick>();
        let schema = request.schema.clone().unwrap();
        assert!(schema.to_string().contains("indices"));
        assert!(request.rendered_prompt().contains("JSON Schema"));
    }

    #[test]
    fn test_anthropic_stream_lines() {
        let d = Dialect::Anthropic;
        assert_eq!(
            d.parse_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#),
            StreamLine::Text("Hel".to_string())
        );
        assert_eq!(d.parse_line("event: content_block_delta"), StreamLine::Skip);
        assert_eq!(d.parse_line(r#"data: {"type":"message_stop"}"#), StreamLine::Done);
    }

    #[test]
    fn test_openai_stream_lines() {
        let d = Dialect::OpenAi;
        assert_eq!(
            d.parse_line(r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#),
            StreamLine::Text("lo".to_string())
        );
        assert_eq!(d.parse_line("data: [DONE]"), StreamLine::Done);
        assert_eq!(d.parse_line(""), StreamLine::Skip);
    }

    #[test]
    fn test_extract_reply() {
        let anthropic = json!({"content": [{"type": "text", "text": "MODERATE"}]});
        assert_eq!(Dialect::Anthropic.extract_reply(&anthropic).unwrap(), "MODERATE");

        let openai = json!({"choices": [{"message": {"content": "SIMPLE"}}]});
        assert_eq!(Dialect::OpenAi.extract_reply(&openai).unwrap(), "SIMPLE");
    }
}
