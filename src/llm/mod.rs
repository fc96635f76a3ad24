//! LLM provider integration.
//!
//! Defines the `ChatProvider` trait, implementations for OpenAI-compatible
//! endpoints (OpenAI, OpenRouter, xAI) and Anthropic, and the
//! `QueryAdapter` that turns one model configuration plus a prompt into
//! one completion, with telemetry and a bounded timeout.

pub mod anthropic;
pub mod openai;
pub mod telemetry;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::forecast::budget::bare_model_name;
use crate::types::ModelConfig;
use telemetry::{InferenceLog, InferenceTelemetry};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sampling temperature for standard models. Independent samples are
/// averaged later, so diversity between them is wanted.
pub const STANDARD_TEMPERATURE: f32 = 1.0;

/// Model-name prefixes of reasoning models: no system role, no temperature.
const REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4"];

/// Whether `model_name` belongs to the reasoning family.
pub fn is_reasoning_model(model_name: &str) -> bool {
    let name = bare_model_name(model_name);
    REASONING_PREFIXES.iter().any(|p| name.starts_with(p))
}

// ---------------------------------------------------------------------------
// Wire-agnostic request / response
// ---------------------------------------------------------------------------

/// One chat call, already shaped for the model family.
#[derive(Debug)]
pub struct ChatRequest {
    pub model: String,
    pub api_key: SecretString,
    /// `None` for reasoning models: their instructions live in `user`.
    pub system: Option<String>,
    pub user: String,
    /// `None` for reasoning models.
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// What a provider returns for a successful call.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// A reply plus the wall-clock latency the adapter measured.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub latency: Duration,
}

impl Completion {
    pub fn tokens_used(&self) -> u32 {
        self.usage.total()
    }
}

/// Provider call failures. Returned as values; callers decide severity.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("no client registered for provider '{0}'")]
    UnknownProvider(String),
}

/// Abstraction over chat-completion APIs.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Issue one chat call.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError>;

    /// Provider name for logging and identification.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps a model's `provider` key to the client that serves it.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &str, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(key.to_lowercase(), provider);
    }

    pub fn with(mut self, key: &str, provider: Arc<dyn ChatProvider>) -> Self {
        self.register(key, provider);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers.get(&key.to_lowercase()).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.providers.contains_key(&key.to_lowercase())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

// ---------------------------------------------------------------------------
// Query adapter
// ---------------------------------------------------------------------------

/// Correlation metadata carried into inference telemetry.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub operation: &'static str,
    pub run_id: Uuid,
    pub forecast_id: String,
    pub sample: u32,
}

/// Issues single chat calls for a model configuration.
pub struct QueryAdapter {
    registry: ProviderRegistry,
    telemetry: Arc<dyn InferenceTelemetry>,
    call_timeout: Duration,
    max_output_tokens: u32,
    reasoning_max_output_tokens: u32,
}

impl QueryAdapter {
    pub fn new(
        registry: ProviderRegistry,
        telemetry: Arc<dyn InferenceTelemetry>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            telemetry,
            call_timeout,
            max_output_tokens: 1024,
            reasoning_max_output_tokens: 8192,
        }
    }

    /// Override output-token limits (reasoning models spend tokens thinking).
    pub fn with_output_limits(mut self, standard: u32, reasoning: u32) -> Self {
        self.max_output_tokens = standard;
        self.reasoning_max_output_tokens = reasoning;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Shape the request for the model family.
    pub fn build_request(&self, model: &ModelConfig, system: &str, user: &str) -> ChatRequest {
        let api_key = SecretString::new(model.credential.expose_secret().clone());
        if is_reasoning_model(model.model_name()) {
            ChatRequest {
                model: model.model_name().to_string(),
                api_key,
                system: None,
                user: format!("{system}\n\n{user}"),
                temperature: None,
                max_tokens: self.reasoning_max_output_tokens,
            }
        } else {
            ChatRequest {
                model: model.model_name().to_string(),
                api_key,
                system: Some(system.to_string()),
                user: user.to_string(),
                temperature: Some(STANDARD_TEMPERATURE),
                max_tokens: self.max_output_tokens,
            }
        }
    }

    /// Issue one call and record it. Never panics on provider failure.
    pub async fn query(
        &self,
        model: &ModelConfig,
        system: &str,
        user: &str,
        ctx: &CallContext,
    ) -> Result<Completion, LlmError> {
        let started = Instant::now();

        let outcome = match self.registry.get(model.provider()) {
            None => Err(LlmError::UnknownProvider(model.provider().to_string())),
            Some(provider) => {
                let request = self.build_request(model, system, user);
                debug!(
                    provider = model.provider(),
                    model = model.model_name(),
                    reasoning = request.system.is_none(),
                    sample = ctx.sample,
                    "Issuing chat call"
                );
                match tokio::time::timeout(self.call_timeout, provider.chat(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout(self.call_timeout)),
                }
            }
        };

        let latency = started.elapsed();
        let (usage, error) = match &outcome {
            Ok(reply) => (reply.usage, None),
            Err(e) => (TokenUsage::default(), Some(e.to_string())),
        };

        self.telemetry.record(&InferenceLog::new(
            model.provider(),
            model.model_name(),
            ctx,
            model.id(),
            usage,
            latency,
            error,
        ));

        outcome.map(|reply| Completion {
            text: reply.text,
            usage: reply.usage,
            latency,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
