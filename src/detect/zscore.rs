//! Rolling z-score control: latest point against the mean/std of all prior
//! points in the window.

use super::stats;
use super::{confidence_from_z, DetectError, Detector, Finding, Method};
use crate::config::RuleConfig;
use crate::series::Series;
use serde_json::json;

const MIN_BASELINE_POINTS: usize = 5;

pub struct ZScoreDetector;

impl Detector for ZScoreDetector {
    fn method(&self) -> Method {
        Method::ZScore
    }

    fn evaluate(
        &self,
        series: &Series,
        config: &RuleConfig,
    ) -> Result<Option<Finding>, DetectError> {
        let values = series.values();
        if values.len() < MIN_BASELINE_POINTS + 1 {
            return Err(DetectError::InsufficientData {
                needed: MIN_BASELINE_POINTS + 1,
                have: values.len(),
            });
        }

        let (baseline, observed_slice) = values.split_at(values.len() - 1);
        let observed = observed_slice[0];
        let baseline_mean = stats::mean(baseline);
        let baseline_std = stats::sample_std(baseline);
        if baseline_std <= stats::EPSILON {
            return Ok(None);
        }

        let z = stats::zscore(observed, baseline_mean, baseline_std);
        if z.abs() < config.zscore_z {
            return Ok(None);
        }

        let Some(last) = series.last() else {
            return Ok(None);
        };
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
                "baseline_mean": baseline_mean,
                "baseline_std": baseline_std,
                "z_score": z,
                "baseline_points": baseline.len(),
                "threshold": config.zscore_z,
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
    fn test_gross_spike_triggers_with_full_confidence() {
        let series = series_from_values(
            "tx_fail_rate",
            last_date(),
            &[100.0, 102.0, 98.0, 101.0, 99.0, 97.0, 200.0],
        );
        let finding = ZScoreDetector
            .evaluate(&series, &RuleConfig::default())
            .unwrap()
            .expect("spike must trigger");

        assert!((finding.baseline_value - 99.5).abs() < 1e-9);
        assert!((finding.confidence - 1.0).abs() < 1e-9);
        let z = finding.context["z_score"].as_f64().unwrap();
        assert!(z > 50.0);
    }

    #[test]
    fn test_in_band_point_does_not_trigger() {
        let series = series_from_values(
            "tx_fail_rate",
            last_date(),
            &[100.0, 102.0, 98.0, 101.0, 99.0, 97.0, 101.0],
        );
        let finding = ZScoreDetector
            .evaluate(&series, &RuleConfig::default())
            .unwrap();
        assert!(finding.is_none());
    }

    #[test]
    fn test_short_series_is_insufficient_data() {
        let series = series_from_values("tx_fail_rate", last_date(), &[1.0, 2.0, 3.0]);
        let err = ZScoreDetector
            .evaluate(&series, &RuleConfig::default())
            .unwrap_err();
        assert!(matches!(err, DetectError::InsufficientData { .. }));
    }

    #[test]
    fn test_flat_baseline_is_no_signal() {
        // Zero baseline variance: deviation is not scored, not divided by.
        let mut values = vec![10.0; 9];
        values.push(99.0);
        let series = series_from_values("tx_fail_rate", last_date(), &values);
        assert!(ZScoreDetector
            .evaluate(&series, &RuleConfig::default())
            .unwrap()
            .is_none());
    }
}
