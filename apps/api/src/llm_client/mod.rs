//! LLM client: the single point of entry for all Gemini API calls.
//!
//! No other module talks to the model provider directly. Handlers template a
//! prompt and hand it to `call`, `call_json` or `stream`.
use std::time::Duration;

use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub mod json;
pub mod prompts;
pub mod sse;

pub use json::extract_json;
use sse::SseDecoder;

const MAX_OUTPUT_TOKENS: u32 = 8192;
const TEMPERATURE: f32 = 0.7;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Prompt blocked by provider: {0}")]
    Blocked(String),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("No JSON object found in LLM output")]
    NoJson,

    #[error("Stream receiver dropped")]
    Cancelled,
}

/// Connection settings for the hosted model.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
    /// First backoff delay; doubles on every retry.
    pub retry_base_delay: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

/// One `generateContent` response, or one event of a streamed response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub usage_metadata: Option<Usage>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

impl LlmResponse {
    /// Concatenated text of all parts of the first candidate.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();
        (!text.is_empty()).then_some(text)
    }

    /// True when the model stopped because it ran out of output tokens.
    pub fn is_truncated(&self) -> bool {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            == Some("MAX_TOKENS")
    }

    pub fn block_reason(&self) -> Option<&str> {
        if !self.candidates.is_empty() {
            return None;
        }
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }
}

/// The single LLM client used by all handlers.
/// Wraps the Gemini `generateContent` API with retry logic, structured output
/// helpers and token streaming.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.settings.api_base, self.settings.model, method
        )
    }

    fn request_body<'a>(prompt: &'a str, system: &'a str) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: system }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
                response_mime_type: "application/json",
            },
        }
    }

    /// Sends the request until a success status comes back.
    /// Retries on transport errors, 429 and 5xx with exponential backoff.
    async fn send_with_retry(
        &self,
        url: &str,
        body: &GenerateContentRequest<'_>,
    ) -> Result<Response, LlmError> {
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.settings.retry_base_delay * (1 << (attempt - 1));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(url)
                .header("x-goog-api-key", &self.settings.api_key)
                .header("content-type", "application/json")
                .json(body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(if status.as_u16() == 429 {
                    LlmError::RateLimited {
                        retries: attempt + 1,
                    }
                } else {
                    LlmError::Api {
                        status: status.as_u16(),
                        message: body,
                    }
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    /// Makes a one-shot call, returning the full response object.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<LlmResponse, LlmError> {
        let body = Self::request_body(prompt, system);
        let response = self
            .send_with_retry(&self.endpoint("generateContent"), &body)
            .await?;

        let llm_response: LlmResponse = response.json().await?;

        if let Some(reason) = llm_response.block_reason() {
            return Err(LlmError::Blocked(reason.to_string()));
        }
        if llm_response.is_truncated() {
            warn!("LLM call hit the output token limit; answer is truncated");
        }
        if let Some(usage) = &llm_response.usage_metadata {
            debug!(
                "LLM call succeeded: prompt_tokens={}, output_tokens={}",
                usage.prompt_token_count, usage.candidates_token_count
            );
        }

        Ok(llm_response)
    }

    /// Calls the LLM and deserializes the JSON object recovered from its text.
    /// The prompt must instruct the model to return valid JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let response = self.call(prompt, system).await?;
        let text = response.text().ok_or(LlmError::EmptyContent)?;
        let value = extract_json(&text).ok_or(LlmError::NoJson)?;
        serde_json::from_value(value).map_err(LlmError::Parse)
    }

    /// Streams the answer, forwarding every text delta on `chunk_tx` as it
    /// arrives. Returns the full text once the provider closes the stream.
    pub async fn stream(
        &self,
        prompt: &str,
        system: &str,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<String, LlmError> {
        let body = Self::request_body(prompt, system);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let mut response = self.send_with_retry(&url, &body).await?;

        let mut decoder = SseDecoder::default();
        let mut full_text = String::new();
        let mut usage: Option<Usage> = None;

        while let Some(chunk) = response.chunk().await? {
            for data in decoder.push(&chunk) {
                Self::forward_event(&data, &mut full_text, &mut usage, &chunk_tx).await?;
            }
            if decoder.is_done() {
                break;
            }
        }
        for data in decoder.finish() {
            Self::forward_event(&data, &mut full_text, &mut usage, &chunk_tx).await?;
        }

        if let Some(usage) = usage {
            debug!(
                "LLM stream finished: prompt_tokens={}, output_tokens={}, total_tokens={}",
                usage.prompt_token_count, usage.candidates_token_count, usage.total_token_count
            );
        }

        if full_text.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(full_text)
    }

    async fn forward_event(
        data: &str,
        full_text: &mut String,
        usage: &mut Option<Usage>,
        chunk_tx: &mpsc::Sender<String>,
    ) -> Result<(), LlmError> {
        let mut event: LlmResponse = serde_json::from_str(data)?;

        if let Some(error) = event.error.take() {
            return Err(LlmError::Api {
                status: error.code,
                message: error.message,
            });
        }
        if let Some(reason) = event.block_reason() {
            return Err(LlmError::Blocked(reason.to_string()));
        }
        if event.is_truncated() {
            warn!("LLM stream hit the output token limit; answer is truncated");
        }
        if let Some(u) = event.usage_metadata.take() {
            *usage = Some(u);
        }
        if let Some(delta) = event.text() {
            full_text.push_str(&delta);
            chunk_tx
                .send(delta)
                .await
                .map_err(|_| LlmError::Cancelled)?;
        }
        Ok(())
    }
}
