//! SQLite storage layer -- schema, queries, migrations.

pub mod schema;

use anyhow::Result;
use chrono::NaiveDate;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Open an in-memory pool, migrated. Test and demo use.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory();
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

/// Save one finalized daily aggregate produced by the external metrics job.
/// Re-loading the same (date, metric, dimensions) key replaces the value.
pub fn save_metric_point(
    pool: &Pool,
    metric_date: NaiveDate,
    metric_name: &str,
    dimensions: &str,
    value: f64,
) -> Result<()> {
    let conn = pool.get()?;

    conn.execute(
        "INSERT INTO metrics_daily (metric_date, metric_name, dimensions, value)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (metric_date, metric_name, dimensions)
         DO UPDATE SET value = excluded.value",
        rusqlite::params![
            metric_date.format("%Y-%m-%d").to_string(),
            metric_name,
            dimensions,
            value
        ],
    )?;

    Ok(())
}
