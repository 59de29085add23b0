//! riskwatch -- explainable statistical anomaly detection and risk scoring
//! for daily business metrics.
//!
//! This crate consumes finalized daily aggregates, runs five independent
//! control-chart-style detectors per (metric, dimension) series, translates
//! findings into direction-corrected business impact and a bounded risk
//! score, and persists deduplicated alerts with an OPEN -> ACK -> RESOLVED
//! lifecycle.

pub mod alert;
pub mod config;
pub mod detect;
pub mod engine;
pub mod risk;
pub mod series;
pub mod storage;

pub use engine::{run_detection, DetectionReport};
