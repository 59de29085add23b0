//! Small statistics helpers shared by the detectors.
//!
//! Computed in Rust rather than SQL so sample variance is well-defined
//! everywhere, and so near-zero variance is handled in exactly one place.

/// Variances below this are treated as "no signal" rather than divided by.
pub const EPSILON: f64 = 1e-9;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (ddof = 1). Zero for fewer than two points.
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    sum_sq / (values.len() - 1) as f64
}

pub fn sample_std(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

/// Z-score guarded against near-zero variance: a flat baseline yields 0,
/// never an unbounded statistic.
pub fn zscore(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev <= EPSILON {
        return 0.0;
    }
    (value - mean) / std_dev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_stats() {
        let values = [100.0, 102.0, 98.0, 101.0, 99.0, 97.0];
        assert!((mean(&values) - 99.5).abs() < 1e-9);
        // sum of squared deviations = 17.5, ddof=1 => 3.5
        assert!((sample_variance(&values) - 3.5).abs() < 1e-9);
        assert!((sample_std(&values) - 3.5f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_zscore_flat_baseline_is_zero() {
        assert_eq!(zscore(42.0, 10.0, 0.0), 0.0);
        assert!((zscore(200.0, 99.5, 3.5f64.sqrt()) - 53.72).abs() < 0.01);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(sample_variance(&[1.0]), 0.0);
    }
}
