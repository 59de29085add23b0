//! Alert records and their lifecycle: idempotent upsert from findings,
//! explicit ACK/RESOLVE transitions, recent listing.
//!
//! Dedup key is (metric_name, metric_date, method) among OPEN alerts, backed
//! by a partial unique index. RESOLVED is terminal: a fresh anomaly on the
//! same date opens a new row, it never reopens the resolved one.

use crate::detect::{Finding, Method};
use crate::risk::Severity;
use crate::storage::Pool;
use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(i64),
    #[error("alert {alert_id} is {status}, transition not allowed")]
    InvalidTransition { alert_id: i64, status: AlertStatus },
    #[error("concurrent writers raced on alert key {metric_name}/{metric_date}/{method}")]
    Conflict {
        metric_name: String,
        metric_date: NaiveDate,
        method: Method,
    },
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Pool(#[from] r2d2::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Open,
    Ack,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "OPEN",
            AlertStatus::Ack => "ACK",
            AlertStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Option<AlertStatus> {
        match s {
            "OPEN" => Some(AlertStatus::Open),
            "ACK" => Some(AlertStatus::Ack),
            "RESOLVED" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_id: i64,
    pub metric_name: String,
    pub metric_date: NaiveDate,
    pub method: Method,
    pub severity: Severity,
    pub rule_version: String,
    pub risk_score: f64,
    pub message: String,
    pub context: serde_json::Value,
    pub status: AlertStatus,
    pub acked_by: Option<String>,
    pub acked_at: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
    pub created_at: String,
}

const ALERT_COLUMNS: &str = "alert_id, metric_name, metric_date, method, severity, rule_version,
           risk_score, message, context, status, acked_by, acked_at,
           resolved_by, resolved_at, created_at";

fn text_column_error(index: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        format!("unrecognized {what}").into(),
    )
}

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let date_str: String = row.get(2)?;
    let method_str: String = row.get(3)?;
    let severity_str: String = row.get(4)?;
    let context_str: String = row.get(8)?;
    let status_str: String = row.get(9)?;

    Ok(Alert {
        alert_id: row.get(0)?,
        metric_name: row.get(1)?,
        metric_date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .map_err(|_| text_column_error(2, "metric_date"))?,
        method: Method::parse(&method_str).ok_or_else(|| text_column_error(3, "method"))?,
        severity: Severity::parse(&severity_str)
            .ok_or_else(|| text_column_error(4, "severity"))?,
        rule_version: row.get(5)?,
        risk_score: row.get(6)?,
        message: row.get(7)?,
        context: serde_json::from_str(&context_str)
            .map_err(|_| text_column_error(8, "context payload"))?,
        status: AlertStatus::parse(&status_str).ok_or_else(|| text_column_error(9, "status"))?,
        acked_by: row.get(10)?,
        acked_at: row.get(11)?,
        resolved_by: row.get(12)?,
        resolved_at: row.get(13)?,
        created_at: row.get(14)?,
    })
}

/// Alert persistence and lifecycle over the shared pool.
pub struct AlertStore {
    pool: Pool,
}

impl AlertStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn get(&self, alert_id: i64) -> Result<Alert, AlertError> {
        let conn = self.pool.get()?;
        self.get_with_conn(&conn, alert_id)
    }

    fn get_with_conn(&self, conn: &Connection, alert_id: i64) -> Result<Alert, AlertError> {
        conn.query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = ?1"),
            [alert_id],
            row_to_alert,
        )
        .optional()?
        .ok_or(AlertError::NotFound(alert_id))
    }

    /// Create or refresh the OPEN alert for (metric, date, method).
    ///
    /// Re-runs overwrite risk_score, severity, message, and context of the
    /// matched OPEN row; created_at and rule_version stay as recorded at
    /// creation. A uniqueness race on insert is retried once as
    /// read-merge-write before surfacing as `Conflict`.
    pub fn upsert(
        &self,
        finding: &Finding,
        risk_score: f64,
        severity: Severity,
        rule_version: &str,
        message: &str,
    ) -> Result<Alert, AlertError> {
        let mut conn = self.pool.get()?;
        let date_str = finding.date.format("%Y-%m-%d").to_string();
        let context_str = finding.context.to_string();

        for attempt in 0..2 {
            // Immediate transaction: the OPEN lookup and the merge write hold
            // the write lock together, so a concurrent resolve cannot land
            // between them and have the merge rewrite a terminal row.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let open_id: Option<i64> = tx
                .query_row(
                    "SELECT alert_id FROM alerts
                     WHERE metric_name = ?1 AND metric_date = ?2 AND method = ?3
                       AND status = 'OPEN'",
                    params![finding.metric_name, date_str, finding.method.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(alert_id) = open_id {
                // Guarded so the merge only ever touches a row that is still
                // OPEN; zero rows updated falls through to the insert path.
                let updated = tx.execute(
                    "UPDATE alerts
                     SET risk_score = ?1, severity = ?2, message = ?3, context = ?4
                     WHERE alert_id = ?5 AND status = 'OPEN'",
                    params![
                        risk_score,
                        severity.as_str(),
                        message,
                        context_str,
                        alert_id
                    ],
                )?;
                if updated == 1 {
                    let alert = self.get_with_conn(&tx, alert_id)?;
                    tx.commit()?;
                    return Ok(alert);
                }
            }

            let inserted = tx.execute(
                "INSERT INTO alerts (metric_name, metric_date, method, severity, rule_version,
                                     risk_score, message, context, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'OPEN')",
                params![
                    finding.metric_name,
                    date_str,
                    finding.method.as_str(),
                    severity.as_str(),
                    rule_version,
                    risk_score,
                    message,
                    context_str
                ],
            );

            match inserted {
                Ok(_) => {
                    let alert_id = tx.last_insert_rowid();
                    let alert = self.get_with_conn(&tx, alert_id)?;
                    tx.commit()?;
                    return Ok(alert);
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    if attempt > 0 {
                        break;
                    }
                    // A concurrent writer created the OPEN row first; loop to
                    // merge into it. The dropped transaction rolls back.
                    tracing::debug!(
                        metric = %finding.metric_name,
                        method = %finding.method,
                        "alert insert raced, retrying as update"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AlertError::Conflict {
            metric_name: finding.metric_name.clone(),
            metric_date: finding.date,
            method: finding.method,
        })
    }

    /// Acknowledge an alert. The first ack wins the timestamp; re-acking an
    /// ACK alert only updates the actor.
    pub fn ack(&self, alert_id: i64, actor: &str) -> Result<Alert, AlertError> {
        let conn = self.pool.get()?;
        let current = self.get_with_conn(&conn, alert_id)?;
        if current.status == AlertStatus::Resolved {
            return Err(AlertError::InvalidTransition {
                alert_id,
                status: current.status,
            });
        }

        conn.execute(
            "UPDATE alerts
             SET status = 'ACK', acked_by = ?1, acked_at = COALESCE(acked_at, ?2)
             WHERE alert_id = ?3",
            params![actor, Utc::now().to_rfc3339(), alert_id],
        )?;
        self.get_with_conn(&conn, alert_id)
    }

    /// Resolve an alert. Terminal: a resolved alert never goes back to OPEN.
    /// Resolving an un-acked alert back-fills the ack fields with the same
    /// actor.
    pub fn resolve(&self, alert_id: i64, actor: &str) -> Result<Alert, AlertError> {
        let conn = self.pool.get()?;
        let current = self.get_with_conn(&conn, alert_id)?;
        if current.status == AlertStatus::Resolved {
            return Err(AlertError::InvalidTransition {
                alert_id,
                status: current.status,
            });
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE alerts
             SET status = 'RESOLVED',
                 resolved_by = ?1,
                 resolved_at = ?2,
                 acked_by = COALESCE(acked_by, ?1),
                 acked_at = COALESCE(acked_at, ?2)
             WHERE alert_id = ?3",
            params![actor, now, alert_id],
        )?;
        self.get_with_conn(&conn, alert_id)
    }

    pub fn list_recent(
        &self,
        limit: usize,
        status: Option<AlertStatus>,
    ) -> Result<Vec<Alert>, AlertError> {
        let conn = self.pool.get()?;
        let mut alerts = Vec::new();

        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ALERT_COLUMNS} FROM alerts WHERE status = ?1
                     ORDER BY created_at DESC, alert_id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![status.as_str(), limit as i64], row_to_alert)?;
                for row in rows {
                    alerts.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ALERT_COLUMNS} FROM alerts
                     ORDER BY created_at DESC, alert_id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map([limit as i64], row_to_alert)?;
                for row in rows {
                    alerts.push(row?);
                }
            }
        }

        Ok(alerts)
    }
}
