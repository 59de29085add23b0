//! Daily metric series -- ordered, gap-aware, rebuilt per detection run.

use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::params;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("series for {metric} not in date order at {date}")]
    OutOfOrder { metric: String, date: NaiveDate },
    #[error("duplicate date {date} in series for {metric}")]
    DuplicateDate { metric: String, date: NaiveDate },
}

/// One finalized daily aggregate, read-only to this core.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub metric_name: String,
    pub dimension_key: String,
    pub date: NaiveDate,
    pub value: f64,
}

/// Ordered daily series for one (metric, dimension) key.
///
/// Invariant: strictly increasing dates, no duplicates. Missing days are
/// simply absent -- never zero-filled or interpolated.
#[derive(Debug, Clone)]
pub struct Series {
    metric_name: String,
    dimension_key: String,
    points: Vec<MetricPoint>,
}

impl Series {
    pub fn new(
        metric_name: impl Into<String>,
        dimension_key: impl Into<String>,
        points: Vec<MetricPoint>,
    ) -> Result<Self, SeriesError> {
        let metric_name = metric_name.into();
        for pair in points.windows(2) {
            if pair[1].date == pair[0].date {
                return Err(SeriesError::DuplicateDate {
                    metric: metric_name,
                    date: pair[1].date,
                });
            }
            if pair[1].date < pair[0].date {
                return Err(SeriesError::OutOfOrder {
                    metric: metric_name,
                    date: pair[1].date,
                });
            }
        }
        Ok(Self {
            metric_name,
            dimension_key: dimension_key.into(),
            points,
        })
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn dimension_key(&self) -> &str {
        &self.dimension_key
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&MetricPoint> {
        self.points.last()
    }

    /// The series with the trailing `drop_last` points removed. Used for
    /// persistence counting: evaluating the same detector as of earlier days.
    pub fn prefix(&self, drop_last: usize) -> Option<Series> {
        if drop_last >= self.points.len() {
            return None;
        }
        let end = self.points.len() - drop_last;
        Some(Series {
            metric_name: self.metric_name.clone(),
            dimension_key: self.dimension_key.clone(),
            points: self.points[..end].to_vec(),
        })
    }
}

/// Load the series for one (metric, dimension) key covering
/// `[as_of - lookback_days, as_of]` from `metrics_daily`.
pub fn build_series(
    pool: &Pool,
    metric_name: &str,
    dimension_key: &str,
    as_of: NaiveDate,
    lookback_days: i64,
) -> Result<Series> {
    let conn = pool.get().context("get connection for series build")?;
    let from = as_of - chrono::Duration::days(lookback_days);

    let mut stmt = conn.prepare(
        "SELECT metric_date, value FROM metrics_daily
         WHERE metric_name = ?1 AND dimensions = ?2
           AND metric_date >= ?3 AND metric_date <= ?4
         ORDER BY metric_date ASC",
    )?;

    let rows = stmt.query_map(
        params![
            metric_name,
            dimension_key,
            from.format("%Y-%m-%d").to_string(),
            as_of.format("%Y-%m-%d").to_string()
        ],
        |row| {
            let date_str: String = row.get(0)?;
            let value: f64 = row.get(1)?;
            Ok((date_str, value))
        },
    )?;

    let mut points = Vec::new();
    for r in rows {
        let (date_str, value) = r?;
        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .with_context(|| format!("bad metric_date {date_str} for {metric_name}"))?;
        points.push(MetricPoint {
            metric_name: metric_name.to_string(),
            dimension_key: dimension_key.to_string(),
            date,
            value,
        });
    }

    Series::new(metric_name, dimension_key, points).map_err(Into::into)
}

#[cfg(test)]
pub(crate) fn series_from_values(metric_name: &str, last_date: NaiveDate, values: &[f64]) -> Series {
    let start = last_date - chrono::Duration::days(values.len() as i64 - 1);
    let points = values
        .iter()
        .enumerate()
        .map(|(i, &v)| MetricPoint {
            metric_name: metric_name.to_string(),
            dimension_key: "{}".to_string(),
            date: start + chrono::Duration::days(i as i64),
            value: v,
        })
        .collect();
    Series::new(metric_name, "{}", points).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(date: NaiveDate, value: f64) -> MetricPoint {
        MetricPoint {
            metric_name: "dau".to_string(),
            dimension_key: "{}".to_string(),
            date,
            value,
        }
    }

    #[test]
    fn test_rejects_out_of_order_dates() {
        let d1 = NaiveDate::from_ymd_opt(2026, 1, 13).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap();
        let err = Series::new("dau", "{}", vec![point(d1, 1.0), point(d2, 2.0)]).unwrap_err();
        assert!(matches!(err, SeriesError::OutOfOrder { .. }));
    }

    #[test]
    fn test_rejects_duplicate_dates() {
        let d = NaiveDate::from_ymd_opt(2026, 1, 13).unwrap();
        let err = Series::new("dau", "{}", vec![point(d, 1.0), point(d, 2.0)]).unwrap_err();
        assert!(matches!(err, SeriesError::DuplicateDate { .. }));
    }

    #[test]
    fn test_gaps_are_preserved() {
        let d1 = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 1, 13).unwrap();
        let s = Series::new("dau", "{}", vec![point(d1, 1.0), point(d2, 2.0)]).unwrap();
        assert_eq!(s.len(), 2); // the missing days are not filled in
    }

    #[test]
    fn test_prefix_drops_trailing_points() {
        let last = NaiveDate::from_ymd_opt(2026, 1, 13).unwrap();
        let s = series_from_values("dau", last, &[1.0, 2.0, 3.0, 4.0]);
        let p = s.prefix(1).unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.last().unwrap().value, 3.0);
        assert!(s.prefix(4).is_none());
    }

    #[test]
    fn test_build_series_reads_window_in_order() {
        let pool = crate::storage::open_memory_pool().unwrap();
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 13).unwrap();
        // Insert out of order; the query sorts
        for (offset, value) in [(0i64, 3.0), (2, 1.0), (1, 2.0), (40, 99.0)] {
            crate::storage::save_metric_point(
                &pool,
                as_of - chrono::Duration::days(offset),
                "dau",
                "{}",
                value,
            )
            .unwrap();
        }

        let s = build_series(&pool, "dau", "{}", as_of, 30).unwrap();
        assert_eq!(s.values(), vec![1.0, 2.0, 3.0]); // 40-day-old point excluded
        assert_eq!(s.last().unwrap().date, as_of);
    }
}
