//! The detection run: one batch over every (metric, dimension) series for a
//! target date.
//!
//! Detector-local failures never escape a series; series-local failures never
//! escape the run. The report carries how many series failed alongside the
//! alerts the rest produced.

use crate::alert::{Alert, AlertStore};
use crate::config::{self, RuleConfig, DEFAULT_RULE_NAME};
use crate::detect::{self, DetectError, Detector};
use crate::risk;
use crate::series::{build_series, Series};
use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LOOKBACK_DAYS: i64 = 30;

/// Series shorter than this are skipped outright; no detector can say
/// anything useful about them.
const MIN_SERIES_POINTS: usize = 6;

/// Cap on the consecutive-day persistence count.
const MAX_PERSISTENCE_DAYS: u32 = 7;

/// Outcome of one `run_detection` invocation.
#[derive(Debug, Serialize)]
pub struct DetectionReport {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub rule_version: String,
    pub alerts: Vec<Alert>,
    pub series_total: usize,
    pub series_failed: usize,
}

/// Run the full pipeline for every configured metric series as of one date.
/// Idempotent: re-running updates matched OPEN alerts instead of duplicating
/// them. Missing or malformed rule configuration aborts the whole run.
pub fn run_detection(pool: &Pool, as_of: NaiveDate) -> Result<DetectionReport> {
    let run_id = Uuid::new_v4();
    let config = config::load_rule_config(pool, DEFAULT_RULE_NAME)
        .context("detection run requires an active rule configuration")?;
    info!(%run_id, %as_of, rule_version = %config.rule_version, "detection run start");

    let keys = list_series_keys(pool, as_of)?;
    let store = AlertStore::new(pool.clone());
    let registry = detect::registry();

    let mut alerts = Vec::new();
    let mut series_failed = 0usize;
    let series_total = keys.len();

    for (metric_name, dimension_key) in keys {
        match detect_series(
            pool,
            &store,
            &registry,
            &metric_name,
            &dimension_key,
            as_of,
            &config,
        ) {
            Ok(mut series_alerts) => alerts.append(&mut series_alerts),
            Err(e) => {
                warn!(metric = %metric_name, dimensions = %dimension_key, error = %e,
                      "series failed, continuing with the rest");
                series_failed += 1;
            }
        }
    }

    info!(%run_id, alerts = alerts.len(), series_failed, series_total,
          "detection run complete ({series_failed} of {series_total} series failed)");

    Ok(DetectionReport {
        run_id,
        as_of,
        rule_version: config.rule_version,
        alerts,
        series_total,
        series_failed,
    })
}

/// Distinct (metric_name, dimensions) pairs with data in the lookback window.
fn list_series_keys(pool: &Pool, as_of: NaiveDate) -> Result<Vec<(String, String)>> {
    let conn = pool.get().context("get connection for series enumeration")?;
    let from = as_of - chrono::Duration::days(LOOKBACK_DAYS);

    let mut stmt = conn.prepare(
        "SELECT DISTINCT metric_name, dimensions FROM metrics_daily
         WHERE metric_date >= ?1 AND metric_date <= ?2
         ORDER BY metric_name, dimensions",
    )?;
    let rows = stmt.query_map(
        [
            from.format("%Y-%m-%d").to_string(),
            as_of.format("%Y-%m-%d").to_string(),
        ],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    )?;

    let mut keys = Vec::new();
    for r in rows {
        keys.push(r?);
    }
    Ok(keys)
}

fn detect_series(
    pool: &Pool,
    store: &AlertStore,
    registry: &[Box<dyn Detector>],
    metric_name: &str,
    dimension_key: &str,
    as_of: NaiveDate,
    config: &RuleConfig,
) -> Result<Vec<Alert>> {
    let series = build_series(pool, metric_name, dimension_key, as_of, LOOKBACK_DAYS)?;
    if series.len() < MIN_SERIES_POINTS {
        debug!(metric = %metric_name, points = series.len(), "series too short, skipping");
        return Ok(Vec::new());
    }
    let has_target_value = series.last().map(|p| p.date) == Some(as_of);
    if !has_target_value {
        debug!(metric = %metric_name, %as_of, "no finalized value for target date, skipping");
        return Ok(Vec::new());
    }

    let mut alerts = Vec::new();
    for detector in registry {
        let finding = match detector.evaluate(&series, config) {
            Ok(Some(finding)) => finding,
            Ok(None) => continue,
            Err(DetectError::InsufficientData { needed, have }) => {
                debug!(metric = %metric_name, method = %detector.method(), needed, have,
                       "insufficient history, no finding");
                continue;
            }
        };

        let impact = risk::impact(metric_name, finding.observed_value, finding.baseline_value);
        if impact <= 0.0 {
            debug!(metric = %metric_name, method = %finding.method,
                   "favorable deviation, alert suppressed");
            continue;
        }

        let persistence = persistence_count(detector.as_ref(), &series, config);
        let score = risk::risk_score(impact, finding.confidence, persistence);
        let severity = risk::severity_for_score(score, config);
        let message = format!(
            "{} {} signal on {}: observed={:.4}, baseline={:.4}, risk={:.2}",
            metric_name, finding.method, finding.date, finding.observed_value,
            finding.baseline_value, score
        );

        let alert = store.upsert(&finding, score, severity, &config.rule_version, &message)?;
        info!(metric = %metric_name, method = %finding.method, %severity,
              risk_score = score, persistence, alert_id = alert.alert_id, "alert upserted");
        alerts.push(alert);
    }

    Ok(alerts)
}

/// Consecutive recent days (ending at the target date) on which the same
/// method also triggered, found by re-evaluating it on series prefixes.
/// A calendar gap ends the streak: with missing days in between, an earlier
/// anomalous day is not "consecutive".
fn persistence_count(detector: &dyn Detector, series: &Series, config: &RuleConfig) -> u32 {
    let mut count = 1;
    let Some(mut streak_date) = series.last().map(|p| p.date) else {
        return count;
    };
    for drop_last in 1..MAX_PERSISTENCE_DAYS {
        let Some(prefix) = series.prefix(drop_last as usize) else {
            break;
        };
        let Some(previous) = prefix.last() else {
            break;
        };
        if previous.date != streak_date - chrono::Duration::days(1) {
            break;
        }
        match detector.evaluate(&prefix, config) {
            Ok(Some(_)) => {
                count += 1;
                streak_date = previous.date;
            }
            _ => break,
        }
    }
    count
}
