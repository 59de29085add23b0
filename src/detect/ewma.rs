//! EWMA control chart: an exponentially weighted moving average of the
//! series, with the latest point tested against the smoothed mean in units
//! of the EWMA control sigma.

use super::stats;
use super::{confidence_from_z, DetectError, Detector, Finding, Method};
use crate::config::RuleConfig;
use crate::series::Series;
use serde_json::json;

const MIN_POINTS: usize = 6;

/// A perfectly flat baseline has zero sample std; under a strict no-signal
/// rule a gross level shift would never chart. The control sigma therefore
/// gets a floor of 1% of |baseline mean|, so sub-floor jitter stays quiet
/// while a real level shift still signals.
const SIGMA_FLOOR_FRACTION: f64 = 0.01;

pub struct EwmaDetector;

impl Detector for EwmaDetector {
    fn method(&self) -> Method {
        Method::Ewma
    }

    fn evaluate(
        &self,
        series: &Series,
        config: &RuleConfig,
    ) -> Result<Option<Finding>, DetectError> {
        let values = series.values();
        if values.len() < MIN_POINTS {
            return Err(DetectError::InsufficientData {
                needed: MIN_POINTS,
                have: values.len(),
            });
        }
        let Some(last) = series.last() else {
            return Ok(None);
        };

        let (baseline, observed_slice) = values.split_at(values.len() - 1);
        let observed = observed_slice[0];
        let baseline_mean = stats::mean(baseline);
        let baseline_std = stats::sample_std(baseline);

        // The smoothing recursion runs strictly in date order; the series
        // construction invariant guarantees that.
        let lambda = config.ewma_lambda;
        let mut ewma = baseline[0];
        for &v in &baseline[1..] {
            ewma = lambda * v + (1.0 - lambda) * ewma;
        }
        let ewma_current = lambda * observed + (1.0 - lambda) * ewma;

        let control_sigma = baseline_std * (lambda / (2.0 - lambda)).sqrt();
        let sigma = control_sigma.max(SIGMA_FLOOR_FRACTION * baseline_mean.abs());
        if sigma <= stats::EPSILON {
            return Ok(None);
        }

        let z = (ewma_current - baseline_mean) / sigma;
        if z.abs() < config.ewma_limit {
            return Ok(None);
        }

        Ok(Some(Finding {
            method: self.method(),
            metric_name: series.metric_name().to_string(),
            dimension_key: series.dimension_key().to_string(),
            date: last.date,
            observed_value: observed,
            baseline_value: baseline_mean,
            confidence: confidence_from_z(z),
            context: json!({
                "method": self.method().as_str(),
                "observed": observed,
                "ewma": ewma_current,
                "baseline_mean": baseline_mean,
                "baseline_std": baseline_std,
                "ewma_z": z,
                "lambda": lambda,
                "limit": config.ewma_limit,
            }),
        }))
    }
}
