//! Seasonal deviation: today's value against a same-weekday baseline.

use super::stats;
use super::{confidence_from_z, DetectError, Detector, Finding, Method};
use crate::config::RuleConfig;
use crate::series::Series;
use chrono::Datelike;
use serde_json::json;

/// Only the most recent same-weekday points count, so an old regime does not
/// drag the seasonal baseline.
const MAX_SEASONAL_POINTS: usize = 4;

pub struct SeasonalDetector;

impl Detector for SeasonalDetector {
    fn method(&self) -> Method {
        Method::Seasonal
    }

    fn evaluate(
        &self,
        series: &Series,
        config: &RuleConfig,
    ) -> Result<Option<Finding>, DetectError> {
        let Some(last) = series.last() else {
            return Ok(None);
        };
        let weekday = last.date.weekday();

        let mut seasonal: Vec<f64> = series
            .points()
            .iter()
            .filter(|p| p.date < last.date && p.date.weekday() == weekday)
            .map(|p| p.value)
            .collect();
        if seasonal.len() > MAX_SEASONAL_POINTS {
            seasonal.drain(..seasonal.len() - MAX_SEASONAL_POINTS);
        }

        if seasonal.len() < config.seasonal_min_points {
            return Err(DetectError::InsufficientData {
                needed: config.seasonal_min_points,
                have: seasonal.len(),
            });
        }

        let seasonal_mean = stats::mean(&seasonal);
        let seasonal_std = stats::sample_std(&seasonal);
        if seasonal_std <= stats::EPSILON {
            return Ok(None);
        }

        let z = stats::zscore(last.value, seasonal_mean, seasonal_std);
        if z.abs() < config.seasonal_z {
            return Ok(None);
        }

        Ok(Some(Finding {
            method: self.method(),
            metric_name: series.metric_name().to_string(),
            dimension_key: series.dimension_key().to_string(),
            date: last.date,
            observed_value: last.value,
            baseline_value: seasonal_mean,
            confidence: confidence_from_z(z),
            context: json!({
                "method": self.method().as_str(),
                "observed": last.value,
                "weekday": weekday.to_string(),
                "seasonal_mean": seasonal_mean,
                "seasonal_std": seasonal_std,
                "seasonal_z": z,
                "seasonal_points": seasonal.len(),
                "threshold": config.seasonal_z,
            }),
        }))
    }
}
