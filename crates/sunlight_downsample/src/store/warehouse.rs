//! DuckDB-backed warehouse.
//!
//! DuckDB is single-writer per process, so one `DuckDbWarehouse` owns one
//! connection. All statements are wrapped in `warehouse.*` debug spans with
//! their duration recorded on completion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use duckdb::types::{TimeUnit, Value};
use duckdb::{Connection, Row, ToSql};
use serde::Serialize;
use tracing::{debug_span, info};

use super::{DownsampledStore, RawReadingSink, RawReadingStore, TimeBounds};
use crate::error::StoreError;
use crate::time::from_micros;
use crate::types::{DownsampledPoint, RawRecord};

/// DuckDB caps prepared parameters well above this, but large VALUES lists
/// slow down planning.
const MAX_PARAMS_PER_STATEMENT: usize = 1_000;

/// Mirrors `RawRecord::validate`. The character class is Unicode `White_Space`,
/// which is what `str::trim` strips; SQL `trim()` only strips spaces.
const VALID_RAW_PREDICATE: &str = r"sensor_id IS NOT NULL
    AND NOT regexp_matches(sensor_id, '^[\x{9}-\x{D}\x{85}\pZ]*$')
    AND sensor_set_id IS NOT NULL
    AND NOT regexp_matches(sensor_set_id, '^[\x{9}-\x{D}\x{85}\pZ]*$')
    AND light_intensity IS NOT NULL
    AND isfinite(light_intensity)";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS raw_readings (
    sensor_id VARCHAR,
    sensor_set_id VARCHAR,
    "timestamp" TIMESTAMP NOT NULL,
    light_intensity DOUBLE
);

CREATE TABLE IF NOT EXISTS downsampled_readings (
    observation_minute TIMESTAMP NOT NULL,
    sensor_id VARCHAR NOT NULL,
    sensor_set_id VARCHAR NOT NULL,
    smoothed_light_intensity DOUBLE NOT NULL,
    last_updated TIMESTAMP NOT NULL,
    PRIMARY KEY (observation_minute, sensor_id)
);
"#;

const POINT_COLUMNS: &str =
    "epoch_us(observation_minute), sensor_id, sensor_set_id, smoothed_light_intensity, epoch_us(last_updated)";

/// Row counts and time range, for `plan` and `config` output.
#[derive(Debug, Clone, Serialize)]
pub struct WarehouseSummary {
    pub raw_rows: u64,
    pub raw_bounds: Option<TimeBounds>,
    pub downsampled_rows: u64,
    pub downsampled_sensors: u64,
    pub max_observation_minute: Option<DateTime<Utc>>,
}

pub struct DuckDbWarehouse {
    conn: Connection,
    path: Option<PathBuf>,
}

impl DuckDbWarehouse {
    /// Open (or create) a warehouse file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let warehouse = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        warehouse.ensure_schema()?;
        info!(path = %path.display(), "Opened warehouse");
        Ok(warehouse)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let warehouse = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        warehouse.ensure_schema()?;
        Ok(warehouse)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.execute_batch(SCHEMA_SQL)
    }

    pub fn summary(&self) -> Result<WarehouseSummary, StoreError> {
        let raw_rows = self.query_scalar_u64("SELECT count(*) FROM raw_readings")?;
        let downsampled_rows = self.query_scalar_u64("SELECT count(*) FROM downsampled_readings")?;
        let downsampled_sensors =
            self.query_scalar_u64("SELECT count(DISTINCT sensor_id) FROM downsampled_readings")?;
        Ok(WarehouseSummary {
            raw_rows,
            raw_bounds: self.raw_time_bounds()?,
            downsampled_rows,
            downsampled_sensors,
            max_observation_minute: self.max_observation_minute()?,
        })
    }

    /// Newest downsampled rows, optionally for one sensor.
    pub fn recent_points(
        &self,
        sensor_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DownsampledPoint>, StoreError> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {POINT_COLUMNS} FROM downsampled_readings");
        if let Some(sensor_id) = sensor_id {
            sql.push_str(" WHERE sensor_id = ?");
            params.push(Value::Text(sensor_id.to_string()));
        }
        sql.push_str(" ORDER BY observation_minute DESC, sensor_id LIMIT ?");
        params.push(Value::BigInt(i64::try_from(limit).unwrap_or(i64::MAX)));

        let rows = self.query_rows(&sql, &params, point_row)?;
        rows.into_iter().map(PointRow::into_point).collect()
    }

    /// Run `op` inside an explicit transaction, rolling back on error.
    pub fn transaction<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>,
    {
        self.conn.execute_batch("BEGIN")?;
        match op(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => Err(err),
                Err(rollback_err) => Err(StoreError::Transaction(format!(
                    "{}; rollback failed: {}",
                    err, rollback_err
                ))),
            },
        }
    }

    fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        let span = debug_span!(
            "warehouse.exec_batch",
            op = "BATCH",
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();
        self.conn.execute_batch(sql)?;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let span = debug_span!(
            "warehouse.exec",
            op = sql_op_name(sql),
            params = params.len(),
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let mut stmt = self.conn.prepare(sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
        let rows = stmt.execute(param_refs.as_slice())?;

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(rows as u64)
    }

    fn query_rows<T, F>(&self, sql: &str, params: &[Value], map: F) -> Result<Vec<T>, StoreError>
    where
        F: FnMut(&Row<'_>) -> duckdb::Result<T>,
    {
        let span = debug_span!(
            "warehouse.query",
            op = sql_op_name(sql),
            rows = tracing::field::Empty,
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let mut stmt = self.conn.prepare(sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), map)?
            .collect::<Result<Vec<T>, _>>()?;

        span.record("rows", rows.len() as u64);
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(rows)
    }

    fn query_scalar_u64(&self, sql: &str) -> Result<u64, StoreError> {
        let rows = self.query_rows(sql, &[], |row| row.get::<_, i64>(0))?;
        Ok(rows.first().copied().unwrap_or(0).max(0) as u64)
    }

    fn upsert_chunk(&self, chunk: &[DownsampledPoint]) -> Result<u64, StoreError> {
        let values_clause = std::iter::repeat("(?, ?, ?, ?, ?)")
            .take(chunk.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO downsampled_readings \
             (observation_minute, sensor_id, sensor_set_id, smoothed_light_intensity, last_updated) \
             VALUES {values_clause} \
             ON CONFLICT (observation_minute, sensor_id) DO UPDATE SET \
             sensor_set_id = excluded.sensor_set_id, \
             smoothed_light_intensity = excluded.smoothed_light_intensity, \
             last_updated = excluded.last_updated"
        );
        let mut params = Vec::with_capacity(chunk.len() * 5);
        for point in chunk {
            params.push(timestamp_value(point.observation_minute));
            params.push(Value::Text(point.sensor_id.clone()));
            params.push(Value::Text(point.sensor_set_id.clone()));
            params.push(Value::Double(point.smoothed_light_intensity));
            params.push(timestamp_value(point.last_updated));
        }
        self.execute(&sql, &params)?;
        Ok(chunk.len() as u64)
    }

    fn append_chunk(&self, chunk: &[RawRecord]) -> Result<u64, StoreError> {
        let values_clause = std::iter::repeat("(?, ?, ?, ?)")
            .take(chunk.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO raw_readings (sensor_id, sensor_set_id, \"timestamp\", light_intensity) \
             VALUES {values_clause}"
        );
        let mut params = Vec::with_capacity(chunk.len() * 4);
        for record in chunk {
            params.push(optional_text(record.sensor_id.as_deref()));
            params.push(optional_text(record.sensor_set_id.as_deref()));
            params.push(timestamp_value(record.timestamp));
            params.push(record.light_intensity.map(Value::Double).unwrap_or(Value::Null));
        }
        self.execute(&sql, &params)?;
        Ok(chunk.len() as u64)
    }
}

impl RawReadingStore for DuckDbWarehouse {
    fn raw_time_bounds(&self) -> Result<Option<TimeBounds>, StoreError> {
        let rows = self.query_rows(
            "SELECT epoch_us(min(\"timestamp\")), epoch_us(max(\"timestamp\")) FROM raw_readings",
            &[],
            |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
        )?;
        match rows.first() {
            Some((Some(earliest), Some(latest))) => Ok(Some(TimeBounds {
                earliest: timestamp_from_micros(*earliest)?,
                latest: timestamp_from_micros(*latest)?,
            })),
            _ => Ok(None),
        }
    }

    fn scan_raw(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let rows = self.query_rows(
            "SELECT sensor_id, sensor_set_id, epoch_us(\"timestamp\"), light_intensity \
             FROM raw_readings \
             WHERE \"timestamp\" >= ? AND \"timestamp\" < ? \
             ORDER BY \"timestamp\"",
            &[timestamp_value(start), timestamp_value(end)],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            },
        )?;

        rows.into_iter()
            .map(|(sensor_id, sensor_set_id, micros, light_intensity)| {
                Ok(RawRecord {
                    sensor_id,
                    sensor_set_id,
                    timestamp: timestamp_from_micros(micros)?,
                    light_intensity,
                })
            })
            .collect()
    }

    fn latest_raw_by_sensor_since(
        &self,
        from: DateTime<Utc>,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError> {
        let sql = format!(
            "SELECT sensor_id, epoch_us(max(\"timestamp\")) \
             FROM raw_readings \
             WHERE \"timestamp\" >= ? AND {VALID_RAW_PREDICATE} \
             GROUP BY sensor_id"
        );
        let rows = self.query_rows(&sql, &[timestamp_value(from)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        rows.into_iter()
            .map(|(sensor_id, micros)| Ok((sensor_id, timestamp_from_micros(micros)?)))
            .collect()
    }

    fn earliest_raw_since(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StoreError> {
        let sql = format!(
            "SELECT epoch_us(min(\"timestamp\")) \
             FROM raw_readings \
             WHERE \"timestamp\" >= ? AND {VALID_RAW_PREDICATE}"
        );
        let rows = self.query_rows(&sql, &[timestamp_value(from)], |row| {
            row.get::<_, Option<i64>>(0)
        })?;
        rows.into_iter()
            .flatten()
            .next()
            .map(timestamp_from_micros)
            .transpose()
    }
}

impl RawReadingSink for DuckDbWarehouse {
    fn append_raw(&self, records: &[RawRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.transaction(|warehouse| {
            let mut total = 0;
            for chunk in records.chunks(MAX_PARAMS_PER_STATEMENT / 4) {
                total += warehouse.append_chunk(chunk)?;
            }
            Ok(total)
        })
    }
}

impl DownsampledStore for DuckDbWarehouse {
    fn max_observation_minute(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rows = self.query_rows(
            "SELECT epoch_us(max(observation_minute)) FROM downsampled_readings",
            &[],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        rows.into_iter()
            .flatten()
            .next()
            .map(timestamp_from_micros)
            .transpose()
    }

    fn last_points_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<DownsampledPoint>, StoreError> {
        let sql = format!(
            "SELECT {POINT_COLUMNS} FROM downsampled_readings \
             WHERE observation_minute < ? \
             QUALIFY row_number() OVER (PARTITION BY sensor_id ORDER BY observation_minute DESC) = 1 \
             ORDER BY sensor_id"
        );
        let rows = self.query_rows(&sql, &[timestamp_value(before)], point_row)?;
        rows.into_iter().map(PointRow::into_point).collect()
    }

    fn points_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DownsampledPoint>, StoreError> {
        let sql = format!(
            "SELECT {POINT_COLUMNS} FROM downsampled_readings \
             WHERE observation_minute >= ? AND observation_minute < ? \
             ORDER BY sensor_id, observation_minute"
        );
        let rows = self.query_rows(&sql, &[timestamp_value(start), timestamp_value(end)], point_row)?;
        rows.into_iter().map(PointRow::into_point).collect()
    }

    fn upsert_points(&self, points: &[DownsampledPoint]) -> Result<u64, StoreError> {
        if points.is_empty() {
            return Ok(0);
        }
        self.transaction(|warehouse| {
            let mut total = 0;
            for chunk in points.chunks(MAX_PARAMS_PER_STATEMENT / 5) {
                total += warehouse.upsert_chunk(chunk)?;
            }
            Ok(total)
        })
    }
}

struct PointRow {
    minute_us: i64,
    sensor_id: String,
    sensor_set_id: String,
    value: f64,
    updated_us: i64,
}

impl PointRow {
    fn into_point(self) -> Result<DownsampledPoint, StoreError> {
        Ok(DownsampledPoint {
            observation_minute: timestamp_from_micros(self.minute_us)?,
            sensor_id: self.sensor_id,
            sensor_set_id: self.sensor_set_id,
            smoothed_light_intensity: self.value,
            last_updated: timestamp_from_micros(self.updated_us)?,
        })
    }
}

fn point_row(row: &Row<'_>) -> duckdb::Result<PointRow> {
    Ok(PointRow {
        minute_us: row.get(0)?,
        sensor_id: row.get(1)?,
        sensor_set_id: row.get(2)?,
        value: row.get(3)?,
        updated_us: row.get(4)?,
    })
}

fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::Timestamp(TimeUnit::Microsecond, ts.timestamp_micros())
}

fn timestamp_from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    from_micros(micros).ok_or(StoreError::TimestampOutOfRange(micros))
}

fn optional_text(value: Option<&str>) -> Value {
    value
        .map(|s| Value::Text(s.to_string()))
        .unwrap_or(Value::Null)
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, m, s).unwrap()
    }

    fn point(sensor: &str, m: u32, value: f64) -> DownsampledPoint {
        DownsampledPoint {
            observation_minute: at(m, 0),
            sensor_id: sensor.to_string(),
            sensor_set_id: "set".to_string(),
            smoothed_light_intensity: value,
            last_updated: at(59, 0),
        }
    }

    #[test]
    fn test_empty_warehouse_reports_nothing() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        assert_eq!(warehouse.raw_time_bounds().unwrap(), None);
        assert_eq!(warehouse.max_observation_minute().unwrap(), None);
        assert!(warehouse.last_points_before(at(0, 0)).unwrap().is_empty());

        let summary = warehouse.summary().unwrap();
        assert_eq!(summary.raw_rows, 0);
        assert_eq!(summary.downsampled_rows, 0);
    }

    #[test]
    fn test_raw_round_trip_keeps_nulls_and_micros() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        let precise = at(1, 15) + chrono::Duration::microseconds(250);
        let mut missing = RawRecord::new("B", "set", at(2, 0), 0.0);
        missing.light_intensity = None;
        missing.sensor_set_id = None;

        warehouse
            .append_raw(&[RawRecord::new("A", "set", precise, 105.0), missing.clone()])
            .unwrap();

        let rows = warehouse.scan_raw(at(0, 0), at(3, 0)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, precise);
        assert_eq!(rows[1], missing);

        let bounds = warehouse.raw_time_bounds().unwrap().unwrap();
        assert_eq!(bounds.earliest, precise);
        assert_eq!(bounds.latest, at(2, 0));
    }

    #[test]
    fn test_latest_raw_skips_invalid_rows() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        let mut nan = RawRecord::new("A", "set", at(9, 0), 0.0);
        nan.light_intensity = Some(f64::NAN);
        warehouse
            .append_raw(&[
                RawRecord::new("A", "set", at(5, 0), 1.0),
                RawRecord::new("A", "set", at(7, 0), 1.0),
                RawRecord::new("B", "set", at(1, 0), 1.0),
                RawRecord::new("C", "\t", at(8, 0), 1.0),
                RawRecord::new("\u{3000}", "set", at(8, 0), 1.0),
                RawRecord::new("D", " \n", at(8, 0), 1.0),
                nan,
            ])
            .unwrap();

        let latest = warehouse.latest_raw_by_sensor_since(at(2, 0)).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["A"], at(7, 0));
    }

    #[test]
    fn test_earliest_raw_since_matches_rust_validity() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        warehouse
            .append_raw(&[
                RawRecord::new("A", "set", at(1, 0), 1.0),
                RawRecord::new("A", "\t", at(3, 0), 1.0),
                RawRecord::new("\u{2003}", "set", at(4, 0), 1.0),
                RawRecord::new("B", "set", at(6, 0), 1.0),
            ])
            .unwrap();

        assert_eq!(warehouse.earliest_raw_since(at(2, 0)).unwrap(), Some(at(6, 0)));
        assert_eq!(warehouse.earliest_raw_since(at(1, 0)).unwrap(), Some(at(1, 0)));
        assert_eq!(warehouse.earliest_raw_since(at(7, 0)).unwrap(), None);
    }

    #[test]
    fn test_upsert_conflicts_update_in_place() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        warehouse
            .upsert_points(&[point("A", 0, 100.0), point("A", 1, 110.0), point("B", 0, 50.0)])
            .unwrap();
        warehouse.upsert_points(&[point("A", 1, 111.0)]).unwrap();

        let rows = warehouse.points_in_range(at(0, 0), at(5, 0)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].smoothed_light_intensity, 111.0);
        assert_eq!(warehouse.max_observation_minute().unwrap(), Some(at(1, 0)));
    }

    #[test]
    fn test_last_points_before_uses_latest_per_sensor() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        warehouse
            .upsert_points(&[
                point("A", 0, 1.0),
                point("A", 2, 2.0),
                point("A", 4, 3.0),
                point("B", 1, 4.0),
            ])
            .unwrap();

        let seeds = warehouse.last_points_before(at(4, 0)).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!((seeds[0].sensor_id.as_str(), seeds[0].observation_minute), ("A", at(2, 0)));
        assert_eq!((seeds[1].sensor_id.as_str(), seeds[1].observation_minute), ("B", at(1, 0)));
    }

    #[test]
    fn test_large_upsert_spans_several_statements() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        let points: Vec<_> = (0..450)
            .map(|i| DownsampledPoint {
                observation_minute: at(0, 0) + chrono::Duration::minutes(i),
                ..point("A", 0, i as f64)
            })
            .collect();
        assert_eq!(warehouse.upsert_points(&points).unwrap(), 450);
        assert_eq!(warehouse.summary().unwrap().downsampled_rows, 450);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        let result: Result<(), StoreError> = warehouse.transaction(|w| {
            w.upsert_chunk(&[point("A", 0, 1.0)])?;
            Err(StoreError::invalid_input("abort"))
        });
        assert!(result.is_err());
        assert_eq!(warehouse.max_observation_minute().unwrap(), None);
    }

    #[test]
    fn test_recent_points_filters_and_limits() {
        let warehouse = DuckDbWarehouse::open_in_memory().unwrap();
        warehouse
            .upsert_points(&[point("A", 0, 1.0), point("A", 1, 2.0), point("B", 1, 3.0)])
            .unwrap();

        let recent = warehouse.recent_points(Some("A"), 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].observation_minute, at(1, 0));
        assert_eq!(warehouse.recent_points(None, 10).unwrap().len(), 3);
    }
}
