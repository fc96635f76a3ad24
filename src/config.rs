//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at run start, never stored.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::anthropic::AnthropicClient;
use crate::llm::openai::OpenAiCompatClient;
use crate::llm::ProviderRegistry;
use crate::types::{ForecastDefinition, ModelSpec, PredictionType};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Extra or overridden providers, keyed by the name models refer to.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub forecasts: Vec<ForecastConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the scheduler checks for due forecasts.
    pub tick_interval_secs: u64,
    pub model_concurrency: usize,
    /// Upper bound on one provider call, retries included.
    pub call_timeout_secs: u64,
    /// Per-HTTP-request timeout inside provider clients.
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_output_tokens: u32,
    pub reasoning_max_output_tokens: u32,
    pub document_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            model_concurrency: 1,
            call_timeout_secs: 300,
            request_timeout_secs: 120,
            max_retries: 3,
            max_output_tokens: 1024,
            reasoning_max_output_tokens: 8192,
            document_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            url: "sqlite://augur.db".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Append every inference call to this JSON-lines file.
    pub jsonl_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompatible,
    Anthropic,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Provider names usable without a `[providers.*]` entry.
pub const BUILTIN_PROVIDERS: &[&str] = &["openai", "openrouter", "xai", "grok", "anthropic"];

/// A forecast as written in `config.toml`.
#[derive(Debug, Deserialize, Clone)]
pub struct ForecastConfig {
    pub id: String,
    pub proposition: String,
    pub prediction_type: PredictionType,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_headline_count")]
    pub headline_count: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub context_urls: Vec<String>,
    #[serde(default)]
    pub schedule_interval_secs: Option<u64>,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

fn default_headline_count() -> u32 {
    100
}

fn default_iterations() -> u32 {
    3
}

impl ForecastConfig {
    pub fn definition(&self) -> ForecastDefinition {
        ForecastDefinition {
            id: self.id.clone(),
            proposition: self.proposition.clone(),
            prediction_type: self.prediction_type,
            units: self.units.clone(),
            categories: self.categories.clone(),
            headline_count: self.headline_count,
            iterations: self.iterations,
            context_urls: self.context_urls.clone(),
            schedule_interval_secs: self.schedule_interval_secs,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Credential env vars referenced by models but not currently set,
    /// as (model id, env var) pairs.
    pub fn missing_credentials(&self) -> Vec<(String, String)> {
        self.forecasts
            .iter()
            .flat_map(|f| f.models.iter())
            .filter(|m| Self::resolve_env(&m.api_key_env).is_err())
            .map(|m| (m.id.clone(), m.api_key_env.clone()))
            .collect()
    }

    fn provider_known(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        BUILTIN_PROVIDERS.contains(&name.as_str())
            || self.providers.keys().any(|k| k.to_lowercase() == name)
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.engine.tick_interval_secs == 0 {
            problems.push("engine.tick_interval_secs must be > 0".to_string());
        }
        if self.engine.model_concurrency == 0 {
            problems.push("engine.model_concurrency must be >= 1".to_string());
        }
        if self.engine.call_timeout_secs == 0 {
            problems.push("engine.call_timeout_secs must be > 0".to_string());
        }

        let mut forecast_ids = HashSet::new();
        for f in &self.forecasts {
            if !forecast_ids.insert(f.id.as_str()) {
                problems.push(format!("duplicate forecast id '{}'", f.id));
            }
            if f.proposition.trim().is_empty() {
                problems.push(format!("forecast '{}': empty proposition", f.id));
            }
            if !(ForecastDefinition::MIN_ITERATIONS..=ForecastDefinition::MAX_ITERATIONS)
                .contains(&f.iterations)
            {
                problems.push(format!(
                    "forecast '{}': iterations must be {}-{}, got {}",
                    f.id,
                    ForecastDefinition::MIN_ITERATIONS,
                    ForecastDefinition::MAX_ITERATIONS,
                    f.iterations
                ));
            }
            if f.headline_count == 0 {
                problems.push(format!("forecast '{}': headline_count must be > 0", f.id));
            }

            let mut model_ids = HashSet::new();
            for m in &f.models {
                if !model_ids.insert(m.id.as_str()) {
                    problems.push(format!("forecast '{}': duplicate model id '{}'", f.id, m.id));
                }
                if !(m.weight.is_finite() && m.weight > 0.0) {
                    problems.push(format!(
                        "forecast '{}': model '{}' weight must be > 0, got {}",
                        f.id, m.id, m.weight
                    ));
                }
                if !self.provider_known(&m.provider) {
                    problems.push(format!(
                        "forecast '{}': model '{}' uses unknown provider '{}'",
                        f.id, m.id, m.provider
                    ));
                }
                if m.api_key_env.trim().is_empty() {
                    problems.push(format!("forecast '{}': model '{}' has no api_key_env", f.id, m.id));
                }
            }
        }

        if !problems.is_empty() {
            bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
        }
        Ok(())
    }

    /// Build a client for every builtin and configured provider.
    pub fn provider_registry(&self) -> Result<ProviderRegistry> {
        let timeout = Duration::from_secs(self.engine.request_timeout_secs);
        let retries = Some(self.engine.max_retries);
        let mut registry = ProviderRegistry::new();

        for name in ["openai", "openrouter", "xai"] {
            registry.register(name, Arc::new(OpenAiCompatClient::new(name, None, timeout, retries)?));
        }
        registry.register(
            "grok",
            Arc::new(OpenAiCompatClient::new("xai", None, timeout, retries)?),
        );
        registry.register("anthropic", Arc::new(AnthropicClient::new(None, timeout, retries)?));

        for (name, p) in &self.providers {
            let retries = p.max_retries.or(retries);
            match p.kind {
                ProviderKind::OpenaiCompatible => {
                    let client = OpenAiCompatClient::new(name, p.base_url.clone(), timeout, retries)
                        .with_context(|| format!("provider '{name}'"))?;
                    registry.register(name, Arc::new(client));
                }
                ProviderKind::Anthropic => {
                    registry.register(
                        name,
                        Arc::new(AnthropicClient::new(p.base_url.clone(), timeout, retries)?),
                    );
                }
            }
        }

        Ok(registry)
    }
}
