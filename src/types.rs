//! Shared types for the AUGUR engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the forecast, llm, storage
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Headlines
// ---------------------------------------------------------------------------

/// An intelligence headline, as supplied by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub id: String,
    pub title: String,
    pub category: String,
    /// Editorial significance score attached during enrichment.
    pub magnitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Headline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] (magnitude {:.1}) {} ({})",
            self.category,
            self.magnitude,
            self.title,
            self.timestamp.format("%Y-%m-%d"),
        )
    }
}

// ---------------------------------------------------------------------------
// Forecast definitions
// ---------------------------------------------------------------------------

/// What shape of answer a forecast asks the models for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    Percentile,
    PointEstimate,
}

impl PredictionType {
    /// Human-readable label used in log lines and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            PredictionType::Percentile => "percentile",
            PredictionType::PointEstimate => "point-estimate",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionType::Percentile => "percentile",
            PredictionType::PointEstimate => "point_estimate",
        }
    }
}

impl fmt::Display for PredictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PredictionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "percentile" | "percentiles" => Ok(PredictionType::Percentile),
            "point_estimate" | "point" => Ok(PredictionType::PointEstimate),
            other => Err(format!("Unknown prediction type: {other}")),
        }
    }
}

/// A standing forecast question. Read-only to the engine.
///
/// The models that answer it are stored alongside as an ordered list of
/// [`ModelSpec`] keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDefinition {
    pub id: String,
    pub proposition: String,
    pub prediction_type: PredictionType,
    /// Free-text units, echoed into prompts (e.g. "USD per barrel").
    #[serde(default)]
    pub units: String,
    /// Headline categories to include; empty means all.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Requested headline count, before per-model budgeting.
    pub headline_count: u32,
    /// Independent samples per model.
    pub iterations: u32,
    /// External documents prepended to the prompt, in order.
    #[serde(default)]
    pub context_urls: Vec<String>,
    /// When set, the scheduler triggers a run at this cadence.
    #[serde(default)]
    pub schedule_interval_secs: Option<u64>,
}

impl ForecastDefinition {
    pub const MIN_ITERATIONS: u32 = 1;
    pub const MAX_ITERATIONS: u32 = 50;

    /// Iterations clamped into the supported 1–50 range.
    pub fn effective_iterations(&self) -> u32 {
        self.iterations
            .clamp(Self::MIN_ITERATIONS, Self::MAX_ITERATIONS)
    }
}

/// One model entry of a forecast, as stored.
///
/// The credential is referenced by env-var name and only resolved into a
/// [`ModelConfig`] when a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    /// Provider key: "openai" | "openrouter" | "anthropic" | "xai" | ...
    pub provider: String,
    pub model_name: String,
    pub api_key_env: String,
    /// Trust multiplier in the weighted consensus. Must be > 0.
    pub weight: f64,
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (w={:.2})", self.provider, self.model_name, self.weight)
    }
}

/// A model entry with its credential resolved: the read-only snapshot a run
/// works from.
#[derive(Debug)]
pub struct ModelConfig {
    pub spec: ModelSpec,
    pub credential: SecretString,
}

impl Clone for ModelConfig {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            credential: SecretString::new(self.credential.expose_secret().clone()),
        }
    }
}

impl ModelConfig {
    /// Resolve a model entry's credential through `lookup` (normally `std::env::var`).
    pub fn resolve(
        spec: &ModelSpec,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ForecastError> {
        match lookup(&spec.api_key_env) {
            Some(key) if !key.trim().is_empty() => Ok(Self {
                spec: spec.clone(),
                credential: SecretString::new(key),
            }),
            _ => Err(ForecastError::Config(format!(
                "credential {} is not set for model {}",
                spec.api_key_env, spec.id
            ))),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn provider(&self) -> &str {
        &self.spec.provider
    }

    pub fn model_name(&self) -> &str {
        &self.spec.model_name
    }

    pub fn weight(&self) -> f64 {
        self.spec.weight
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Status only ever moves forward: pending → running → {completed, failed}.
    /// A pending run may also fail directly.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("Unknown run status: {other}")),
        }
    }
}

/// One execution of a forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRun {
    pub id: Uuid,
    pub forecast_id: String,
    /// Headlines frozen at run start; later ingestion never changes them.
    pub headline_snapshot: Vec<Headline>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ForecastRun {
    pub fn new(forecast_id: &str, headline_snapshot: Vec<Headline>) -> Self {
        Self {
            id: Uuid::new_v4(),
            forecast_id: forecast_id.to_string(),
            headline_snapshot,
            status: RunStatus::Pending,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Apply a status transition, stamping `completed_at` on terminal states.
    pub fn transition(
        &mut self,
        next: RunStatus,
        error: Option<&str>,
    ) -> Result<(), ForecastError> {
        if !self.status.can_transition_to(next) {
            return Err(ForecastError::InvalidTransition {
                run_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if let Some(e) = error {
            self.error = Some(e.to_string());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

impl fmt::Display for ForecastRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} of {} [{}] ({} headlines)",
            self.id,
            self.forecast_id,
            self.status,
            self.headline_snapshot.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

/// Five-point uncertainty distribution. Always p10 ≤ p25 ≤ p50 ≤ p75 ≤ p90.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentilePredictions {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

impl PercentilePredictions {
    /// Build from five values, rejecting non-finite or descending input.
    pub fn from_array(values: [f64; 5]) -> Option<Self> {
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        if values.windows(2).any(|w| w[0] > w[1]) {
            return None;
        }
        Some(Self {
            p10: values[0],
            p25: values[1],
            p50: values[2],
            p75: values[3],
            p90: values[4],
        })
    }

    pub fn as_array(&self) -> [f64; 5] {
        [self.p10, self.p25, self.p50, self.p75, self.p90]
    }
}

impl fmt::Display for PercentilePredictions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P10={:.2} P25={:.2} P50={:.2} P75={:.2} P90={:.2}",
            self.p10, self.p25, self.p50, self.p75, self.p90,
        )
    }
}

/// A single model's (or sample's) answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Prediction {
    Percentiles(PercentilePredictions),
    PointEstimate(f64),
}

impl Prediction {
    pub fn kind(&self) -> PredictionType {
        match self {
            Prediction::Percentiles(_) => PredictionType::Percentile,
            Prediction::PointEstimate(_) => PredictionType::PointEstimate,
        }
    }

    /// The central value used for dispersion: P50, or the point estimate.
    pub fn representative(&self) -> f64 {
        match self {
            Prediction::Percentiles(p) => p.p50,
            Prediction::PointEstimate(v) => *v,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Percentiles(p) => write!(f, "{p}"),
            Prediction::PointEstimate(v) => write!(f, "{v:.4}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Model responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Failed,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Completed => "completed",
            ResponseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResponseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(ResponseStatus::Completed),
            "failed" => Ok(ResponseStatus::Failed),
            other => Err(format!("Unknown response status: {other}")),
        }
    }
}

/// Sampling provenance kept with every model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleAudit {
    pub valid_samples: u32,
    pub attempted_samples: u32,
    /// Every valid sample value, in the order it was collected.
    pub samples: Vec<Prediction>,
}

/// One model's contribution to a run. Immutable once saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub id: Uuid,
    pub run_id: Uuid,
    pub model_id: String,
    pub provider: String,
    pub model_name: String,
    pub status: ResponseStatus,
    pub error_message: Option<String>,
    /// First valid raw sample text, kept for audit.
    pub reasoning: Option<String>,
    pub tokens_used: u64,
    pub response_time_ms: u64,
    /// Averaged prediction; present iff status is completed.
    pub prediction: Option<Prediction>,
    pub raw_response: SampleAudit,
    pub created_at: DateTime<Utc>,
}

impl ModelResponse {
    /// A terminal failure for `model`, recorded instead of raised.
    pub fn failed(run_id: Uuid, model: &ModelSpec, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            model_id: model.id.clone(),
            provider: model.provider.clone(),
            model_name: model.model_name.clone(),
            status: ResponseStatus::Failed,
            error_message: Some(message.into()),
            reasoning: None,
            tokens_used: 0,
            response_time_ms: 0,
            prediction: None,
            raw_response: SampleAudit::default(),
            created_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ResponseStatus::Completed && self.prediction.is_some()
    }

    pub fn percentile_predictions(&self) -> Option<&PercentilePredictions> {
        match &self.prediction {
            Some(Prediction::Percentiles(p)) => Some(p),
            _ => None,
        }
    }

    pub fn point_estimate(&self) -> Option<f64> {
        match self.prediction {
            Some(Prediction::PointEstimate(v)) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ModelResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.prediction, &self.error_message) {
            (Some(p), _) => write!(
                f,
                "{}/{} [{}] {} ({}/{} samples, {} tokens)",
                self.provider,
                self.model_name,
                self.status,
                p,
                self.raw_response.valid_samples,
                self.raw_response.attempted_samples,
                self.tokens_used,
            ),
            (None, Some(e)) => write!(
                f,
                "{}/{} [{}] {}",
                self.provider, self.model_name, self.status, e
            ),
            (None, None) => write!(f, "{}/{} [{}]", self.provider, self.model_name, self.status),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// The weighted consensus of one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    pub id: Uuid,
    pub run_id: Uuid,
    pub aggregated_percentiles: Option<PercentilePredictions>,
    pub aggregated_point_estimate: Option<f64>,
    /// Number of models that contributed (always ≥ 1).
    pub model_count: u32,
    /// Population SD of the contributors' central values around the weighted
    /// mean; absent when only one model contributed.
    pub consensus_level: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for ForecastResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.aggregated_percentiles {
            write!(f, "{p}")?;
        } else if let Some(v) = self.aggregated_point_estimate {
            write!(f, "estimate={v:.4}")?;
        }
        write!(f, " (models={}", self.model_count)?;
        match self.consensus_level {
            Some(sd) => write!(f, ", sd={sd:.3})"),
            None => write!(f, ")"),
        }
    }
}

/// A run with everything it owns, as returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    pub run: ForecastRun,
    pub responses: Vec<ModelResponse>,
    pub result: Option<ForecastResult>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Run-level failures. Any of these ends a run in `failed`.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("Forecast not found: {0}")]
    DefinitionNotFound(String),

    #[error("Forecast {0} has no models configured")]
    NoModels(String),

    #[error("Headline fetch failed: {0}")]
    HeadlineFetch(String),

    #[error("All {0} models failed to produce a prediction")]
    AllModelsFailed(usize),

    #[error("Consensus failed: {0}")]
    Consensus(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid status transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
