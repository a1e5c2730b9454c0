use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use logwarden_types::LlmAnalysis;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

const SYSTEM_PROMPT: &str = "You are a system log analyzer. Respond precisely, without \
introductions or affirmations. Output only JSON matching this schema: ";

const OUTPUT_SCHEMA: &str = r#"{
  "log_message": "string",
  "breakdown": {
    "timestamp": "string",
    "timezone": "string",
    "module": "string",
    "pci_device": "string",
    "error_message": "string"
  },
  "possible_cause": "string",
  "actionable_steps": ["string"]
}"#;

/// Failure of a single analysis attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("analysis timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl AnalysisError {
    /// Rate limits and timeouts are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout)
    }
}

/// Turns a raw log line into a structured analysis
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, log_line: &str) -> Result<LlmAnalysis, AnalysisError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct ChatCompletionsAnalyzer {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl ChatCompletionsAnalyzer {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn request_body(&self, log_line: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "stream": false,
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": format!("{}{}", SYSTEM_PROMPT, OUTPUT_SCHEMA),
                },
                {
                    "role": "user",
                    "content": format!(
                        "Analyze the following system log:\nLog Message: {}\n\n\
                         1. Break down the log message into its key components.\n\
                         2. Identify the possible cause of the issue.\n\
                         3. Suggest actionable steps, if applicable, to resolve the issue.",
                        log_line
                    ),
                },
            ],
        })
    }
}

#[async_trait]
impl Analyzer for ChatCompletionsAnalyzer {
    async fn analyze(&self, log_line: &str) -> Result<LlmAnalysis, AnalysisError> {
        let Some(api_key) = &self.api_key else {
            return Err(AnalysisError::Other("missing api key".to_string()));
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.request_body(log_line))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout
                } else {
                    AnalysisError::Other(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(AnalysisError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(AnalysisError::Other(format!("HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Other(format!("invalid response body: {}", e)))?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AnalysisError::Other("response has no message content".to_string()))?;
        debug!(chars = content.len(), "LLM response received");

        parse_analysis(content)
    }
}

/// `retry-after` in delta-seconds form. HTTP-date hints are ignored and the
/// caller's backoff applies instead.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Parse the model's JSON, accepting the analysis at top level or nested
/// under a `logAnalysis`/`LogAnalysis` key
pub fn parse_analysis(content: &str) -> Result<LlmAnalysis, AnalysisError> {
    let value: Value = serde_json::from_str(content.trim())
        .map_err(|e| AnalysisError::Other(format!("model returned invalid JSON: {}", e)))?;
    let inner = ["logAnalysis", "LogAnalysis", "log_analysis"]
        .iter()
        .find_map(|k| value.get(*k))
        .cloned()
        .unwrap_or(value);
    serde_json::from_value(inner)
        .map_err(|e| AnalysisError::Other(format!("model output does not match schema: {}", e)))
}
