//! Risk translation: direction-corrected business impact, a deterministic
//! bounded risk score, and configured severity bands.

use crate::config::RuleConfig;
use serde::{Deserialize, Serialize};

/// Which way a metric hurts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// e.g. failure rate, latency
    HigherIsWorse,
    /// e.g. completed transactions, DAU
    LowerIsWorse,
}

/// Static per-metric semantics for impact mapping.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    pub direction: Direction,
    /// Multiplier applied to the (possibly normalized) deviation.
    pub scale: f64,
    /// Normalize the deviation by the baseline magnitude before scaling.
    pub relative: bool,
}

/// Per-metric impact semantics, seeded with the configured business metrics.
/// Unknown metrics fall back to a relative lower-is-worse mapping.
pub fn metric_spec(metric_name: &str) -> MetricSpec {
    match metric_name {
        "tx_fail_rate" => MetricSpec {
            direction: Direction::HigherIsWorse,
            scale: 100.0,
            relative: false,
        },
        "latency_p95_ms" => MetricSpec {
            direction: Direction::HigherIsWorse,
            scale: 0.01,
            relative: false,
        },
        "tx_completed" => MetricSpec {
            direction: Direction::LowerIsWorse,
            scale: 10.0,
            relative: true,
        },
        _ => MetricSpec {
            direction: Direction::LowerIsWorse,
            scale: 5.0,
            relative: true,
        },
    }
}

/// Direction-corrected impact magnitude, never negative. A favorable
/// deviation maps to 0.0, which suppresses alert creation.
pub fn impact(metric_name: &str, observed: f64, baseline: f64) -> f64 {
    let spec = metric_spec(metric_name);
    let deviation = match spec.direction {
        Direction::HigherIsWorse => observed - baseline,
        Direction::LowerIsWorse => baseline - observed,
    };
    if deviation <= 0.0 {
        return 0.0;
    }
    let normalized = if spec.relative {
        deviation / baseline.abs().max(1.0)
    } else {
        deviation
    };
    normalized * spec.scale
}

/// Bounded deterministic risk score. Monotone non-decreasing in impact,
/// confidence, and persistence; no clock, no randomness.
pub fn risk_score(impact: f64, confidence: f64, persistence_count: u32) -> f64 {
    let persistence_factor = 1.0 + 0.3 * persistence_count.saturating_sub(1) as f64;
    impact.max(0.0) * confidence.clamp(0.0, 1.0) * persistence_factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "INFO" => Some(Severity::Info),
            "WARN" => Some(Severity::Warn),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a risk score into the configured severity bands.
pub fn severity_for_score(score: f64, config: &RuleConfig) -> Severity {
    if score >= config.critical_score {
        Severity::Critical
    } else if score >= config.warn_score {
        Severity::Warn
    } else {
        Severity::Info
    }
}
