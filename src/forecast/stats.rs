//! Overflow-safe means and dispersion over finite values.
//!
//! The plain sums are tried first so ordinary inputs get the usual
//! arithmetic. When a sum overflows, the figure is recomputed as a convex
//! combination (mean) or on rescaled deviations (SD), both of which stay
//! within the magnitude of the inputs.

/// Weighted arithmetic mean of `(value, weight)` pairs.
///
/// Weights must be positive and finite. `None` for an empty slice or a
/// non-finite input.
pub fn weighted_mean(points: &[(f64, f64)]) -> Option<f64> {
    if points.is_empty()
        || points
            .iter()
            .any(|&(v, w)| !v.is_finite() || !w.is_finite() || w <= 0.0)
    {
        return None;
    }

    let total_weight: f64 = points.iter().map(|(_, w)| w).sum();
    let weighted: f64 = points.iter().map(|(v, w)| v * w).sum();
    let plain = weighted / total_weight;
    if plain.is_finite() {
        return Some(plain);
    }

    let max_weight = points.iter().map(|(_, w)| *w).fold(0.0f64, f64::max);
    let scaled_total: f64 = points.iter().map(|(_, w)| w / max_weight).sum();
    let mean: f64 = points
        .iter()
        .map(|(v, w)| v * ((w / max_weight) / scaled_total))
        .sum();
    mean.is_finite().then_some(mean)
}

/// Unweighted arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    let points: Vec<(f64, f64)> = values.iter().map(|&v| (v, 1.0)).collect();
    weighted_mean(&points)
}

/// Population standard deviation of `values` around `center`.
pub fn population_sd(values: &[f64], center: f64) -> Option<f64> {
    if values.is_empty() || !center.is_finite() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let n = values.len() as f64;
    let plain = (values.iter().map(|v| (v - center).powi(2)).sum::<f64>() / n).sqrt();
    if plain.is_finite() {
        return Some(plain);
    }

    // Halved deviations cannot overflow; rescale by the largest one.
    let halves: Vec<f64> = values.iter().map(|v| v / 2.0 - center / 2.0).collect();
    let scale = halves.iter().map(|d| d.abs()).fold(0.0f64, f64::max);
    if scale == 0.0 {
        return Some(0.0);
    }
    let sum_sq: f64 = halves.iter().map(|d| (d / scale).powi(2)).sum();
    let sd = 2.0 * scale * (sum_sq / n).sqrt();
    sd.is_finite().then_some(sd)
}
