//! Regime shift: the recent window against the preceding baseline window,
//! on either a sustained mean shift or a volatility-regime change.

use super::stats;
use super::{confidence_from_z, DetectError, Detector, Finding, Method};
use crate::config::RuleConfig;
use crate::series::Series;
use serde_json::json;

pub struct RegimeShiftDetector;

impl Detector for RegimeShiftDetector {
    fn method(&self) -> Method {
        Method::RegimeShift
    }

    fn evaluate(
        &self,
        series: &Series,
        config: &RuleConfig,
    ) -> Result<Option<Finding>, DetectError> {
        let values = series.values();
        let recent_days = config.regime_recent_days;
        let baseline_days = config.regime_baseline_days;
        if recent_days < 2 || baseline_days < 2 {
            return Ok(None);
        }
        if values.len() < recent_days + baseline_days {
            return Err(DetectError::InsufficientData {
                needed: recent_days + baseline_days,
                have: values.len(),
            });
        }
        let Some(last) = series.last() else {
            return Ok(None);
        };

        let recent = &values[values.len() - recent_days..];
        let prior = &values[values.len() - recent_days - baseline_days..values.len() - recent_days];

        let prior_mean = stats::mean(prior);
        let prior_std = stats::sample_std(prior);
        let prior_var = stats::sample_variance(prior);
        let recent_mean = stats::mean(recent);
        let recent_var = stats::sample_variance(recent);

        // Standard error of the recent mean under the prior regime.
        let mean_z = if prior_std > stats::EPSILON {
            (recent_mean - prior_mean) / (prior_std / (recent_days as f64).sqrt())
        } else {
            0.0
        };

        // Both windows flat is no volatility signal; volatility emerging out
        // of a flat prior is.
        let var_ratio = if prior_var > stats::EPSILON {
            recent_var / prior_var
        } else if recent_var > stats::EPSILON {
            f64::INFINITY
        } else {
            1.0
        };

        let mean_shifted = mean_z.abs() >= config.regime_z;
        let variance_shifted =
            var_ratio >= config.regime_var_ratio || var_ratio <= 1.0 / config.regime_var_ratio;
        if !mean_shifted && !variance_shifted {
            return Ok(None);
        }

        Ok(Some(Finding {
            method: self.method(),
            metric_name: series.metric_name().to_string(),
            dimension_key: series.dimension_key().to_string(),
            date: last.date,
            observed_value: last.value,
            baseline_value: prior_mean,
            confidence: confidence_from_z(mean_z),
            context: json!({
                "method": self.method().as_str(),
                "observed": last.value,
                "prior_mean": prior_mean,
                "recent_mean": recent_mean,
                "mean_z": mean_z,
                "prior_var": prior_var,
                "recent_var": recent_var,
                "var_ratio": var_ratio,
                "recent_days": recent_days,
                "baseline_days": baseline_days,
            }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::series_from_values;
    use chrono::NaiveDate;

    fn last_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 13).unwrap()
    }

    #[test]
    fn test_sustained_mean_shift_triggers() {
        // 14 baseline days near 100, then 7 recent days near 140.
        let mut values = vec![
            100.0, 101.0, 99.0, 100.5, 99.5, 100.2, 99.8, 101.0, 99.0, 100.3, 99.7, 100.1, 99.9,
            100.4,
        ];
        values.extend([140.0, 140.5, 139.5, 140.2, 139.8, 140.1, 139.9]);
        let finding = RegimeShiftDetector
            .evaluate(
                &series_from_values("latency_p95_ms", last_date(), &values),
                &RuleConfig::default(),
            )
            .unwrap()
            .expect("mean regime shift must trigger");
        let z = finding.context["mean_z"].as_f64().unwrap();
        assert!(z > 3.0);
        assert!((finding.baseline_value - 100.0).abs() < 0.5);
    }

    #[test]
    fn test_volatility_change_triggers_without_mean_shift() {
        // Same mean, recent variance blows up past the configured ratio.
        let mut values = vec![100.0, 100.2, 99.8, 100.1, 99.9, 100.0, 100.2, 99.8, 100.1, 99.9,
            100.0, 100.2, 99.8, 100.1];
        values.extend([110.0, 90.0, 112.0, 88.0, 109.0, 91.0, 100.0]);
        let finding = RegimeShiftDetector
            .evaluate(
                &series_from_values("latency_p95_ms", last_date(), &values),
                &RuleConfig::default(),
            )
            .unwrap()
            .expect("volatility regime change must trigger");
        let ratio = finding.context["var_ratio"].as_f64().unwrap();
        assert!(ratio > 2.0);
    }

    #[test]
    fn test_stable_regime_does_not_trigger() {
        let values = [
            100.0, 101.0, 99.0, 100.5, 99.5, 100.2, 99.8, 101.0, 99.0, 100.3, 99.7, 100.1, 99.9,
            100.4, 101.0, 99.0, 100.5, 99.5, 100.8, 99.2, 100.0,
        ];
        assert!(RegimeShiftDetector
            .evaluate(
                &series_from_values("latency_p95_ms", last_date(), &values),
                &RuleConfig::default(),
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_flat_windows_are_not_a_volatility_signal() {
        let series = series_from_values("latency_p95_ms", last_date(), &[100.0; 21]);
        assert!(RegimeShiftDetector
            .evaluate(&series, &RuleConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let series = series_from_values("latency_p95_ms", last_date(), &[100.0; 20]);
        assert!(matches!(
            RegimeShiftDetector
                .evaluate(&series, &RuleConfig::default())
                .unwrap_err(),
            DetectError::InsufficientData {
                needed: 21,
                have: 20
            }
        ));
    }
}
