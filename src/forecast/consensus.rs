//! Cross-model consensus.
//!
//! Weighted mean per field over the contributing models, plus a dispersion
//! figure. The centre is weighted by trust but the spread is not: the
//! dispersion is the unweighted population SD of each contributor's central
//! value around the weighted mean, so it measures raw disagreement between
//! models independent of the weights they were assigned.

use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::stats;
use crate::types::{ForecastResult, ModelResponse, PercentilePredictions, Prediction, PredictionType};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsensusError {
    #[error("no model produced a usable {0} prediction")]
    NoContributingModels(&'static str),

    #[error("weighted {0} consensus is not a finite number")]
    NotFinite(&'static str),
}

/// One model's usable answer with its weight.
struct Contribution {
    prediction: Prediction,
    weight: f64,
}

fn contributions(
    prediction_type: PredictionType,
    responses: &[ModelResponse],
    weights: &HashMap<String, f64>,
) -> Vec<Contribution> {
    responses
        .iter()
        .filter(|r| r.is_completed())
        .filter_map(|r| {
            let prediction = r.prediction?;
            if prediction.kind() != prediction_type {
                warn!(model = %r.model_id, "Prediction kind mismatch, excluded from consensus");
                return None;
            }
            match weights.get(&r.model_id) {
                Some(&w) if w > 0.0 && w.is_finite() => Some(Contribution {
                    prediction,
                    weight: w,
                }),
                _ => {
                    warn!(model = %r.model_id, "No positive weight, excluded from consensus");
                    None
                }
            }
        })
        .collect()
}

/// Combine completed model responses into one result.
pub fn aggregate(
    run_id: Uuid,
    prediction_type: PredictionType,
    responses: &[ModelResponse],
    weights: &HashMap<String, f64>,
) -> Result<ForecastResult, ConsensusError> {
    let contribs = contributions(prediction_type, responses, weights);
    if contribs.is_empty() {
        return Err(ConsensusError::NoContributingModels(prediction_type.label()));
    }

    let total_weight: f64 = contribs.iter().map(|c| c.weight).sum();
    let not_finite = || ConsensusError::NotFinite(prediction_type.label());

    let (aggregated_percentiles, aggregated_point_estimate, center) = match prediction_type {
        PredictionType::Percentile => {
            let mut means = [0.0f64; 5];
            for (i, slot) in means.iter_mut().enumerate() {
                let column: Vec<(f64, f64)> = contribs
                    .iter()
                    .filter_map(|c| match c.prediction {
                        Prediction::Percentiles(p) => Some((p.as_array()[i], c.weight)),
                        _ => None,
                    })
                    .collect();
                *slot = stats::weighted_mean(&column).ok_or_else(not_finite)?;
            }
            // Weighted means of ordered vectors stay ordered.
            let percentiles = PercentilePredictions::from_array(means).ok_or_else(not_finite)?;
            (Some(percentiles), None, means[2])
        }
        PredictionType::PointEstimate => {
            let points: Vec<(f64, f64)> = contribs
                .iter()
                .map(|c| (c.prediction.representative(), c.weight))
                .collect();
            let mean = stats::weighted_mean(&points).ok_or_else(not_finite)?;
            (None, Some(mean), mean)
        }
    };

    let model_count = contribs.len();
    let consensus_level = if model_count > 1 {
        let centrals: Vec<f64> = contribs.iter().map(|c| c.prediction.representative()).collect();
        Some(stats::population_sd(&centrals, center).ok_or_else(not_finite)?)
    } else {
        None
    };

    debug!(
        run_id = %run_id,
        model_count,
        total_weight,
        center,
        consensus = ?consensus_level,
        "Consensus aggregated"
    );

    Ok(ForecastResult {
        id: Uuid::new_v4(),
        run_id,
        aggregated_percentiles,
        aggregated_point_estimate,
        model_count: model_count as u32,
        consensus_level,
        created_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelSpec, ResponseStatus, SampleAudit};

    fn spec(id: &str) -> ModelSpec {
        ModelSpec {
            id: id.into(),
            provider: "openai".into(),
            model_name: "gpt-4o".into(),
            api_key_env: "KEY".into(),
            weight: 1.0,
        }
    }

    fn completed(run_id: Uuid, id: &str, prediction: Prediction) -> ModelResponse {
        let mut r = ModelResponse::failed(run_id, &spec(id), "placeholder");
        r.status = ResponseStatus::Completed;
        r.error_message = None;
        r.prediction = Some(prediction);
        r.raw_response = SampleAudit {
            valid_samples: 1,
            attempted_samples: 1,
            samples: vec![prediction],
        };
        r
    }

    fn pct(values: [f64; 5]) -> Prediction {
        Prediction::Percentiles(PercentilePredictions::from_array(values).unwrap())
    }

    fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_weighted_percentiles_and_dispersion() {
        let run_id = Uuid::new_v4();
        let responses = vec![
            completed(run_id, "a", pct([5.0, 8.0, 11.0, 14.0, 17.0])),
            completed(run_id, "b", pct([15.0, 18.0, 21.0, 24.0, 27.0])),
        ];
        let result = aggregate(
            run_id,
            PredictionType::Percentile,
            &responses,
            &weights(&[("a", 1.0), ("b", 2.0)]),
        )
        .unwrap();

        let p = result.aggregated_percentiles.unwrap();
        assert!(approx(p.p50, 17.67));
        assert!(approx(p.p10, 11.67));
        assert!(result.aggregated_point_estimate.is_none());
        assert_eq!(result.model_count, 2);
        // sqrt(((11 - 17.67)^2 + (21 - 17.67)^2) / 2)
        assert!(approx(result.consensus_level.unwrap(), 5.27));
    }

    #[test]
    fn test_failed_model_weight_excluded() {
        let run_id = Uuid::new_v4();
        let responses = vec![
            ModelResponse::failed(run_id, &spec("a"), "no valid percentile responses after 3 samples"),
            completed(run_id, "b", pct([15.0, 18.0, 21.0, 24.0, 27.0])),
        ];
        let result = aggregate(
            run_id,
            PredictionType::Percentile,
            &responses,
            &weights(&[("a", 1.0), ("b", 2.0)]),
        )
        .unwrap();

        assert_eq!(result.aggregated_percentiles.unwrap().p50, 21.0);
        assert_eq!(result.model_count, 1);
        assert!(result.consensus_level.is_none());
    }

    #[test]
    fn test_identical_values_zero_dispersion() {
        let run_id = Uuid::new_v4();
        let responses = vec![
            completed(run_id, "a", Prediction::PointEstimate(42.0)),
            completed(run_id, "b", Prediction::PointEstimate(42.0)),
        ];
        let result = aggregate(
            run_id,
            PredictionType::PointEstimate,
            &responses,
            &weights(&[("a", 0.5), ("b", 3.0)]),
        )
        .unwrap();
        assert_eq!(result.aggregated_point_estimate, Some(42.0));
        assert_eq!(result.consensus_level, Some(0.0));
    }

    #[test]
    fn test_weighted_point_estimate() {
        let run_id = Uuid::new_v4();
        let responses = vec![
            completed(run_id, "a", Prediction::PointEstimate(10.0)),
            completed(run_id, "b", Prediction::PointEstimate(40.0)),
        ];
        let result = aggregate(
            run_id,
            PredictionType::PointEstimate,
            &responses,
            &weights(&[("a", 2.0), ("b", 1.0)]),
        )
        .unwrap();
        assert_eq!(result.aggregated_point_estimate, Some(20.0));
        // Deviations 10 and 20 around 20.
        assert!(approx(result.consensus_level.unwrap(), (250.0f64).sqrt()));
    }

    #[test]
    fn test_huge_weighted_point_estimates_stay_finite() {
        let run_id = Uuid::new_v4();
        let responses = vec![
            completed(run_id, "a", Prediction::PointEstimate(1e308)),
            completed(run_id, "b", Prediction::PointEstimate(1e308)),
        ];
        let result = aggregate(
            run_id,
            PredictionType::PointEstimate,
            &responses,
            &weights(&[("a", 1.0), ("b", 3.0)]),
        )
        .unwrap();
        let mean = result.aggregated_point_estimate.unwrap();
        assert!((mean / 1e308 - 1.0).abs() < 1e-12);
        assert!(result.consensus_level.unwrap().is_finite());
    }

    #[test]
    fn test_wide_disagreement_dispersion_stays_finite() {
        let run_id = Uuid::new_v4();
        let responses = vec![
            completed(run_id, "a", pct([-1.5e308, -1.0, 0.0, 1.0, 2.0])),
            completed(run_id, "b", pct([-2.0, -1.0, 0.0, 1.0, 1.5e308])),
        ];
        let result = aggregate(
            run_id,
            PredictionType::Percentile,
            &responses,
            &weights(&[("a", 1.0), ("b", 1.0)]),
        )
        .unwrap();
        let p = result.aggregated_percentiles.unwrap();
        assert_eq!(p.p50, 0.0);
        assert_eq!(result.consensus_level, Some(0.0));

        let responses = vec![
            completed(run_id, "a", Prediction::PointEstimate(1.5e308)),
            completed(run_id, "b", Prediction::PointEstimate(-1.5e308)),
        ];
        let result = aggregate(
            run_id,
            PredictionType::PointEstimate,
            &responses,
            &weights(&[("a", 1.0), ("b", 1.0)]),
        )
        .unwrap();
        assert_eq!(result.aggregated_point_estimate, Some(0.0));
        assert_eq!(result.consensus_level, Some(1.5e308));
    }

    #[test]
    fn test_no_contributors_is_error() {
        let run_id = Uuid::new_v4();
        let responses = vec![ModelResponse::failed(run_id, &spec("a"), "x")];
        let err = aggregate(
            run_id,
            PredictionType::Percentile,
            &responses,
            &weights(&[("a", 1.0)]),
        )
        .unwrap_err();
        assert_eq!(err, ConsensusError::NoContributingModels("percentile"));
    }

    #[test]
    fn test_mismatched_kind_and_missing_weight_excluded() {
        let run_id = Uuid::new_v4();
        let responses = vec![
            completed(run_id, "a", Prediction::PointEstimate(5.0)),
            completed(run_id, "b", pct([1.0, 2.0, 3.0, 4.0, 5.0])),
            completed(run_id, "c", pct([2.0, 3.0, 4.0, 5.0, 6.0])),
        ];
        let result = aggregate(
            run_id,
            PredictionType::Percentile,
            &responses,
            &weights(&[("a", 1.0), ("b", 1.0)]),
        )
        .unwrap();
        assert_eq!(result.model_count, 1);
        assert_eq!(result.aggregated_percentiles.unwrap().p50, 3.0);
    }
}
