//! Mock provider for integration testing.
//!
//! A deterministic `ChatProvider` that replays a script of replies per
//! model name and records every request it sees. All state is in-memory
//! with no external dependencies.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use augur::data::ExternalDocumentFetcher;
use augur::engine::ForecastEngine;
use augur::llm::telemetry::TracingTelemetry;
use augur::llm::{ChatProvider, ChatReply, ChatRequest, LlmError, ProviderRegistry, QueryAdapter, TokenUsage};
use augur::storage::{ForecastStore, MemoryStore};
use augur::types::{ForecastDefinition, Headline, ModelSpec, PredictionType};

pub const PROVIDER: &str = "scripted";

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(u16),
    Panic,
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub model: String,
    pub system: Option<String>,
    pub user: String,
    pub temperature: Option<f32>,
}

/// Replays `Step`s per model name. An exhausted script answers HTTP 503.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, model: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// Shorthand for a script of plain replies.
    pub fn replies(self, model: &str, texts: &[&str]) -> Self {
        self.script(model, texts.iter().map(|t| Step::Reply(t.to_string())))
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.seen().iter().filter(|r| r.model == model).count()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        self.seen.lock().unwrap().push(SeenRequest {
            model: request.model.clone(),
            system: request.system.clone(),
            user: request.user.clone(),
            temperature: request.temperature,
        });

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front);

        match step {
            Some(Step::Reply(text)) => Ok(ChatReply {
                text,
                usage: TokenUsage {
                    prompt_tokens: 400,
                    completion_tokens: 40,
                },
            }),
            Some(Step::Fail(status)) => Err(LlmError::Api {
                status,
                body: "scripted failure".into(),
            }),
            Some(Step::Panic) => panic!("scripted provider panic"),
            None => Err(LlmError::Api {
                status: 503,
                body: "script exhausted".into(),
            }),
        }
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

/// Serves the same text for every URL.
pub struct StaticDocuments(pub String);

#[async_trait]
impl ExternalDocumentFetcher for StaticDocuments {
    async fn fetch(&self, _url: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn model(id: &str, model_name: &str, weight: f64) -> ModelSpec {
    ModelSpec {
        id: id.into(),
        provider: PROVIDER.into(),
        model_name: model_name.into(),
        api_key_env: format!("{}_API_KEY", id.to_uppercase()),
        weight,
    }
}

pub fn definition(id: &str, prediction_type: PredictionType, iterations: u32) -> ForecastDefinition {
    ForecastDefinition {
        id: id.into(),
        proposition: "Brent crude front-month settlement price on 31 December".into(),
        prediction_type,
        units: "USD per barrel".into(),
        categories: vec!["energy".into()],
        headline_count: 50,
        iterations,
        context_urls: vec!["https://example.com/opec-statement".into()],
        schedule_interval_secs: None,
    }
}

pub fn headlines() -> Vec<Headline> {
    (0..8)
        .map(|i| Headline {
            id: format!("h{i}"),
            title: format!("Tanker traffic update {i}"),
            category: if i % 2 == 0 { "energy" } else { "sports" }.into(),
            magnitude: 5.0 + i as f64 * 0.5,
            timestamp: Utc::now() - Duration::minutes(i),
        })
        .collect()
}

pub fn engine(
    store: Arc<dyn ForecastStore>,
    headlines: Arc<dyn augur::data::HeadlineSource>,
    provider: Arc<ScriptedProvider>,
) -> ForecastEngine {
    let registry = ProviderRegistry::new().with(PROVIDER, provider);
    let adapter = QueryAdapter::new(registry, Arc::new(TracingTelemetry), StdDuration::from_secs(5));
    ForecastEngine::new(
        store,
        headlines,
        Arc::new(StaticDocuments("OPEC+ extends voluntary cuts through Q1.".into())),
        Arc::new(adapter),
    )
    .with_credentials(Arc::new(|_: &str| Some("sk-test".to_string())))
}

/// A memory store holding one forecast and the standard headlines.
pub async fn memory_store(def: &ForecastDefinition, models: &[ModelSpec]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.save_definition(def, models).await.unwrap();
    store.insert_headlines(headlines()).await;
    store
}
