//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS metrics_daily (
            id INTEGER PRIMARY KEY,
            metric_date TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            dimensions TEXT NOT NULL DEFAULT '{}',
            value REAL NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (metric_date, metric_name, dimensions)
        );

        CREATE TABLE IF NOT EXISTS anomaly_rules (
            rule_name TEXT PRIMARY KEY,
            rule_version TEXT NOT NULL,
            config TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS alerts (
            alert_id INTEGER PRIMARY KEY,
            metric_name TEXT NOT NULL,
            metric_date TEXT NOT NULL,
            method TEXT NOT NULL,
            severity TEXT NOT NULL,
            rule_version TEXT NOT NULL,
            risk_score REAL NOT NULL,
            message TEXT NOT NULL,
            context TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'OPEN',
            acked_by TEXT,
            acked_at TEXT,
            resolved_by TEXT,
            resolved_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- At most one OPEN alert per (metric, date, method). Re-runs update
        -- the open row; RESOLVED rows stay put and new rows may follow them.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_open_key
            ON alerts(metric_name, metric_date, method)
            WHERE status = 'OPEN';

        CREATE INDEX IF NOT EXISTS idx_metrics_daily_series
            ON metrics_daily(metric_name, dimensions, metric_date);
        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM metrics_daily", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_open_alert_uniqueness() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let insert = "INSERT INTO alerts (metric_name, metric_date, method, severity, rule_version, risk_score, message, context, status)
                      VALUES ('tx_fail_rate', '2026-01-13', 'z_score', 'WARN', 'v1', 5.0, 'm', '{}', ?1)";
        conn.execute(insert, ["OPEN"]).unwrap();
        assert!(conn.execute(insert, ["OPEN"]).is_err());
        // A RESOLVED row with the same key is allowed alongside
        conn.execute(insert, ["RESOLVED"]).unwrap();
    }
}
