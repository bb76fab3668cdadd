//! AI copywriter for event reminder push notifications.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 512;

const SYSTEM_PROMPT: &str = "You are an assistant that writes friendly, engaging push \
notifications. Your goal is to encourage users to send a card for an upcoming event for one of \
their connections. The tone should be warm, personal, and concise. Output valid JSON only.";

#[derive(Debug, Clone, Error)]
pub enum MessageWriterError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("malformed model output: {0}")]
    Malformed(String),
    #[error("missing api key: ANTHROPIC_API_KEY environment variable not set")]
    MissingApiKey,
}

impl MessageWriterError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Generated push notification text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

/// Writes the title and body for one event reminder. Implemented by the
/// Claude-backed writer in production and by canned writers in tests.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn generate(
        &self,
        connection_name: &str,
        event_name: &str,
        days_ahead: i64,
    ) -> Result<NotificationContent, MessageWriterError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl MessagesResponse {
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text.as_str())
    }
}

/// Claude-backed notification copywriter
#[derive(Debug, Clone)]
pub struct ClaudeMessageWriter {
    http: Client,
    api_key: String,
    model: String,
}

impl ClaudeMessageWriter {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a writer using the ANTHROPIC_API_KEY environment variable
    pub fn from_env() -> Result<Self, MessageWriterError> {
        let api_key =
            std::env::var("ANTHROPIC_API_KEY").map_err(|_| MessageWriterError::MissingApiKey)?;
        Self::new(api_key, None)
    }

    pub fn new(api_key: String, model: Option<String>) -> Result<Self, MessageWriterError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("greeting-tree/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MessageWriterError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    async fn send_once(&self, prompt: &str) -> Result<String, MessageWriterError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let res = self
            .http
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => {
                let parsed = res
                    .json::<MessagesResponse>()
                    .await
                    .map_err(|e| MessageWriterError::Malformed(e.to_string()))?;
                parsed
                    .text()
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        MessageWriterError::Malformed("no text content in response".to_string())
                    })
            }
            StatusCode::UNAUTHORIZED => Err(MessageWriterError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(MessageWriterError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(MessageWriterError::Http { status, body })
            }
        }
    }

    async fn ask(&self, prompt: &str) -> Result<String, MessageWriterError> {
        (|| async { self.send_once(prompt).await })
            .retry(
                &ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(30))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &MessageWriterError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "notification copy request failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }
}

#[async_trait]
impl MessageWriter for ClaudeMessageWriter {
    async fn generate(
        &self,
        connection_name: &str,
        event_name: &str,
        days_ahead: i64,
    ) -> Result<NotificationContent, MessageWriterError> {
        let prompt = build_prompt(connection_name, event_name, days_ahead);
        let response = self.ask(&prompt).await?;

        let json_str = extract_json(&response);
        serde_json::from_str(json_str).map_err(|e| {
            MessageWriterError::Malformed(format!(
                "{e} (response preview: {})",
                json_str.chars().take(200).collect::<String>()
            ))
        })
    }
}

fn build_prompt(connection_name: &str, event_name: &str, days_ahead: i64) -> String {
    format!(
        r#"Generate a push notification for the following upcoming event:

- Connection's Name: {connection_name}
- Event: {event_name}
- Days until the event: {days_ahead}

Create a short, catchy title and a body that includes the key details and a gentle call to
action, like "Want to send a card?". Mention that the event is {days_ahead} days away so the
card arrives in time.

Return ONLY valid JSON:
{{
  "title": "<short, engaging notification title>",
  "body": "<friendly body with a call to action>"
}}"#
    )
}

fn map_reqwest_error(e: reqwest::Error) -> MessageWriterError {
    if e.is_timeout() {
        MessageWriterError::Timeout
    } else {
        MessageWriterError::Transport(e.to_string())
    }
}

/// Extract JSON from model output that may be wrapped in a code fence
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        // Skip past any language identifier on the same line
        let content_start = text[content_start..]
            .find('\n')
            .map(|i| content_start + i + 1)
            .unwrap_or(content_start);
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}
