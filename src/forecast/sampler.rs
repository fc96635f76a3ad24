//! Per-model sampling.
//!
//! Drives N independent calls for one model through the query adapter and
//! the response parser, and reduces the valid samples to one averaged
//! prediction. A model that never produces a valid sample is recorded as a
//! failed response, not raised.

use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{parser, stats};
use crate::llm::{CallContext, QueryAdapter};
use crate::types::{
    ModelConfig, ModelResponse, PercentilePredictions, Prediction, PredictionType,
    ResponseStatus, SampleAudit,
};

/// Raw text logged for a sample that fails to parse.
const LOG_SNIPPET_CHARS: usize = 200;

/// Everything one model needs to be sampled within a run.
#[derive(Debug, Clone)]
pub struct SampleRequest<'a> {
    pub run_id: Uuid,
    pub forecast_id: &'a str,
    pub model: &'a ModelConfig,
    pub prediction_type: PredictionType,
    pub system: &'a str,
    pub prompt: &'a str,
    pub iterations: u32,
}

pub struct Sampler<'a> {
    adapter: &'a QueryAdapter,
}

impl<'a> Sampler<'a> {
    pub fn new(adapter: &'a QueryAdapter) -> Self {
        Self { adapter }
    }

    /// Run every iteration for one model and build its response.
    pub async fn sample(&self, request: SampleRequest<'_>) -> ModelResponse {
        let started = Instant::now();
        let model = request.model;
        let label = request.prediction_type.label();

        let mut samples: Vec<Prediction> = Vec::with_capacity(request.iterations as usize);
        let mut tokens_used: u64 = 0;
        let mut reasoning: Option<String> = None;

        for i in 1..=request.iterations {
            let ctx = CallContext {
                operation: "forecast_sample",
                run_id: request.run_id,
                forecast_id: request.forecast_id.to_string(),
                sample: i,
            };

            let completion = match self
                .adapter
                .query(model, request.system, request.prompt, &ctx)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        run_id = %request.run_id,
                        model = %model.id(),
                        sample = i,
                        error = %e,
                        "Sample call failed, skipping"
                    );
                    continue;
                }
            };

            if completion.text.trim().is_empty() {
                warn!(run_id = %request.run_id, model = %model.id(), sample = i, "Empty response, skipping");
                continue;
            }

            let parsed = match request.prediction_type {
                PredictionType::Percentile => {
                    parser::parse_percentiles(&completion.text).map(Prediction::Percentiles)
                }
                PredictionType::PointEstimate => {
                    parser::parse_point_estimate(&completion.text).map(Prediction::PointEstimate)
                }
            };

            match parsed {
                Ok(prediction) => {
                    debug!(model = %model.id(), sample = i, prediction = %prediction, "Valid sample");
                    tokens_used += u64::from(completion.tokens_used());
                    if reasoning.is_none() {
                        reasoning = Some(completion.text);
                    }
                    samples.push(prediction);
                }
                Err(e) => {
                    let snippet: String = e.text().chars().take(LOG_SNIPPET_CHARS).collect();
                    warn!(
                        run_id = %request.run_id,
                        model = %model.id(),
                        sample = i,
                        error = %e,
                        raw = %snippet,
                        "Unparsable sample, skipping"
                    );
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;

        let prediction = if samples.is_empty() {
            None
        } else {
            average(request.prediction_type, &samples)
        };

        let Some(prediction) = prediction else {
            let message = if samples.is_empty() {
                format!(
                    "no valid {label} responses after {} samples",
                    request.iterations
                )
            } else {
                format!(
                    "mean of {} valid {label} samples is not a finite number",
                    samples.len()
                )
            };
            warn!(run_id = %request.run_id, model = %model.id(), "{message}");
            let mut failed = ModelResponse::failed(request.run_id, &model.spec, message);
            failed.response_time_ms = elapsed_ms;
            failed.tokens_used = tokens_used;
            failed.raw_response = SampleAudit {
                valid_samples: samples.len() as u32,
                attempted_samples: request.iterations,
                samples,
            };
            return failed;
        };

        info!(
            run_id = %request.run_id,
            model = %model.id(),
            valid = samples.len(),
            attempted = request.iterations,
            prediction = %prediction,
            elapsed_ms,
            "Model sampling complete"
        );

        ModelResponse {
            id: Uuid::new_v4(),
            run_id: request.run_id,
            model_id: model.id().to_string(),
            provider: model.provider().to_string(),
            model_name: model.model_name().to_string(),
            status: ResponseStatus::Completed,
            error_message: None,
            reasoning,
            tokens_used,
            response_time_ms: elapsed_ms,
            prediction: Some(prediction),
            raw_response: SampleAudit {
                valid_samples: samples.len() as u32,
                attempted_samples: request.iterations,
                samples,
            },
            created_at: Utc::now(),
        }
    }
}

/// Arithmetic mean per field across the valid samples.
///
/// Samples of the other kind are ignored; `None` when nothing of the
/// requested kind is present or a mean is not representable.
pub fn average(prediction_type: PredictionType, samples: &[Prediction]) -> Option<Prediction> {
    match prediction_type {
        PredictionType::Percentile => {
            let arrays: Vec<[f64; 5]> = samples
                .iter()
                .filter_map(|s| match s {
                    Prediction::Percentiles(p) => Some(p.as_array()),
                    _ => None,
                })
                .collect();
            if arrays.is_empty() {
                return None;
            }
            let mut means = [0.0f64; 5];
            for (i, slot) in means.iter_mut().enumerate() {
                let column: Vec<f64> = arrays.iter().map(|a| a[i]).collect();
                *slot = stats::mean(&column)?;
            }
            PercentilePredictions::from_array(means).map(Prediction::Percentiles)
        }
        PredictionType::PointEstimate => {
            let values: Vec<f64> = samples
                .iter()
                .filter_map(|s| match s {
                    Prediction::PointEstimate(v) => Some(*v),
                    _ => None,
                })
                .collect();
            stats::mean(&values).map(Prediction::PointEstimate)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
