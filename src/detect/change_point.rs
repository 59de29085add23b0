//! Two-window change-point test: the mean shift between the last window and
//! the window before it, in units of the pooled standard deviation.

use super::stats;
use super::{confidence_from_z, DetectError, Detector, Finding, Method};
use crate::config::RuleConfig;
use crate::series::Series;
use serde_json::json;

pub struct ChangePointDetector;

impl Detector for ChangePointDetector {
    fn method(&self) -> Method {
        Method::ChangePoint
    }

    fn evaluate(
        &self,
        series: &Series,
        config: &RuleConfig,
    ) -> Result<Option<Finding>, DetectError> {
        let values = series.values();
        let window = config.change_point_window;
        if window < 2 {
            return Ok(None);
        }
        if values.len() < 2 * window {
            return Err(DetectError::InsufficientData {
                needed: 2 * window,
                have: values.len(),
            });
        }
        let Some(last) = series.last() else {
            return Ok(None);
        };

        let recent = &values[values.len() - window..];
        let previous = &values[values.len() - 2 * window..values.len() - window];

        let recent_mean = stats::mean(recent);
        let previous_mean = stats::mean(previous);
        let recent_var = stats::sample_variance(recent);
        let previous_var = stats::sample_variance(previous);

        let pooled_var = ((window - 1) as f64 * recent_var + (window - 1) as f64 * previous_var)
            / (2 * window - 2) as f64;
        if pooled_var <= stats::EPSILON {
            return Ok(None);
        }
        let pooled_std = pooled_var.sqrt();

        let z = (recent_mean - previous_mean) / (pooled_std * (2.0 / window as f64).sqrt());
        if z.abs() < config.change_point_z {
            return Ok(None);
        }

        Ok(Some(Finding {
            method: self.method(),
            metric_name: series.metric_name().to_string(),
            dimension_key: series.dimension_key().to_string(),
            date: last.date,
            observed_value: last.value,
            baseline_value: previous_mean,
            confidence: confidence_from_z(z),
            context: json!({
                "method": self.method().as_str(),
                "observed": last.value,
                "previous_mean": previous_mean,
                "recent_mean": recent_mean,
                "change_point_z": z,
                "window": window,
                "threshold": config.change_point_z,
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
    fn test_level_shift_across_windows_triggers() {
        // Seven days near 10, then seven days near 30.
        let values = [
            10.0, 10.5, 9.5, 10.2, 9.8, 10.1, 9.9, //
            30.0, 30.4, 29.6, 30.2, 29.8, 30.1, 29.9,
        ];
        let finding = ChangePointDetector
            .evaluate(
                &series_from_values("tx_completed", last_date(), &values),
                &RuleConfig::default(),
            )
            .unwrap()
            .expect("level shift must trigger");
        let z = finding.context["change_point_z"].as_f64().unwrap();
        assert!(z > 3.0);
        assert!((finding.baseline_value - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_stable_series_does_not_trigger() {
        let values = [
            10.0, 10.5, 9.5, 10.2, 9.8, 10.1, 9.9, //
            10.3, 9.7, 10.0, 10.4, 9.6, 10.2, 9.8,
        ];
        assert!(ChangePointDetector
            .evaluate(
                &series_from_values("tx_completed", last_date(), &values),
                &RuleConfig::default(),
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_requires_two_full_windows() {
        let series = series_from_values("tx_completed", last_date(), &[1.0; 13]);
        assert!(matches!(
            ChangePointDetector
                .evaluate(&series, &RuleConfig::default())
                .unwrap_err(),
            DetectError::InsufficientData {
                needed: 14,
                have: 13
            }
        ));
    }
}
