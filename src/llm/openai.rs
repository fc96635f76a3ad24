//! OpenAI-compatible chat completions client.
//!
//! Serves OpenAI itself plus every endpoint that speaks the same wire
//! format (OpenRouter, xAI Grok). Reasoning models get
//! `max_completion_tokens` and no temperature; everything else gets a
//! system message, `max_tokens` and the requested temperature.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{is_reasoning_model, ChatProvider, ChatReply, ChatRequest, LlmError, TokenUsage};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";

/// Default retries on rate limit / server errors.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

/// Known base URL for a provider key, if any.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "openai" => Some(OPENAI_BASE_URL),
        "openrouter" => Some(OPENROUTER_BASE_URL),
        "xai" | "grok" => Some(XAI_BASE_URL),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiCompatClient {
    http: Client,
    name: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAiCompatClient {
    /// Create a client for `name`, using `base_url` or the provider's known default.
    pub fn new(
        name: &str,
        base_url: Option<String>,
        request_timeout: Duration,
        max_retries: Option<u32>,
    ) -> Result<Self> {
        let base_url = base_url
            .or_else(|| default_base_url(name).map(String::from))
            .with_context(|| format!("No base URL configured for provider {name}"))?;

        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .with_context(|| format!("Failed to build {name} HTTP client"))?;

        Ok(Self {
            http,
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn wire_request<'a>(request: &'a ChatRequest) -> CompletionRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: &request.user,
        });

        let reasoning = is_reasoning_model(&request.model);
        CompletionRequest {
            model: &request.model,
            messages,
            max_tokens: (!reasoning).then_some(request.max_tokens),
            max_completion_tokens: reasoning.then_some(request.max_tokens),
            temperature: if reasoning { None } else { request.temperature },
        }
    }

    fn reply_from(body: CompletionResponse) -> ChatReply {
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        let usage = body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        ChatReply { text, usage }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let body = Self::wire_request(request);
        let url = self.endpoint();
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(provider = %self.name, attempt, delay_ms = delay, "Retrying chat call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(&url)
                .bearer_auth(request.api_key.expose_secret())
                .header("Content-Type", "application/json")
                .header("X-Title", "AUGUR Forecast Engine")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: CompletionResponse = response
                            .json()
                            .await
                            .map_err(|e| LlmError::Decode(e.to_string()))?;
                        return Ok(Self::reply_from(parsed));
                    }

                    // Retryable errors: 429 (rate limit), 500+
                    if status.as_u16() == 429 || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(provider = %self.name, status = %status, attempt, "Retryable chat error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    return Err(LlmError::Api {
                        status: status.as_u16(),
                        body: error_text,
                    });
                }
                Err(e) => {
                    warn!(provider = %self.name, attempt, error = %e, "Chat request failed");
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error: last_error.unwrap_or_default(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
