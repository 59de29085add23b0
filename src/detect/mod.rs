//! Statistical anomaly detectors.
//!
//! Five independent control-chart-style methods share one contract:
//! `evaluate(series, config) -> Option<Finding>`, a pure function of its
//! inputs. Insufficient history is a detector-local condition that the engine
//! swallows as "no finding" -- it never fails a detection run.

pub mod change_point;
pub mod ewma;
pub mod regime;
pub mod seasonal;
pub mod stats;
pub mod zscore;

use crate::config::RuleConfig;
use crate::series::Series;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("insufficient data: need {needed} points, have {have}")]
    InsufficientData { needed: usize, have: usize },
}

/// The fixed set of detection methods. Also the alert dedup key component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    ZScore,
    Ewma,
    ChangePoint,
    Seasonal,
    RegimeShift,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::ZScore => "z_score",
            Method::Ewma => "ewma",
            Method::ChangePoint => "change_point",
            Method::Seasonal => "seasonal",
            Method::RegimeShift => "regime_shift",
        }
    }

    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "z_score" => Some(Method::ZScore),
            "ewma" => Some(Method::Ewma),
            "change_point" => Some(Method::ChangePoint),
            "seasonal" => Some(Method::Seasonal),
            "regime_shift" => Some(Method::RegimeShift),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector's raw anomaly signal, before risk translation.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub method: Method,
    pub metric_name: String,
    pub dimension_key: String,
    pub date: NaiveDate,
    pub observed_value: f64,
    pub baseline_value: f64,
    /// Monotonic in the underlying test statistic, clipped to [0, 1].
    pub confidence: f64,
    /// Explanation payload for audit: z values, window bounds, means.
    pub context: serde_json::Value,
}

/// Shared detector contract. Implementations never mutate the series and
/// carry no state between calls.
pub trait Detector: Send + Sync {
    fn method(&self) -> Method;

    fn evaluate(
        &self,
        series: &Series,
        config: &RuleConfig,
    ) -> Result<Option<Finding>, DetectError>;
}

/// The full registry, in evaluation order. Fixed set -- no open-ended
/// registration.
pub fn registry() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(zscore::ZScoreDetector),
        Box::new(ewma::EwmaDetector),
        Box::new(change_point::ChangePointDetector),
        Box::new(seasonal::SeasonalDetector),
        Box::new(regime::RegimeShiftDetector),
    ]
}

/// Confidence from a test statistic: |z| / 5 clipped to [0, 1].
pub(crate) fn confidence_from_z(z: f64) -> f64 {
    (z.abs() / 5.0).min(1.0)
}
