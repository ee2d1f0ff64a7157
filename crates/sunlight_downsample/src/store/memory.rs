use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::{DownsampledStore, RawReadingSink, RawReadingStore, TimeBounds};
use crate::error::StoreError;
use crate::types::{DownsampledPoint, RawRecord};

type PointKey = (String, DateTime<Utc>);

/// In-process warehouse with the same contract as the DuckDB backend.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    raw: RwLock<Vec<RawRecord>>,
    // Keyed by sensor first so per-sensor lookups are range scans.
    points: RwLock<BTreeMap<PointKey, DownsampledPoint>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(records: impl IntoIterator<Item = RawRecord>) -> Self {
        Self {
            raw: RwLock::new(records.into_iter().collect()),
            points: RwLock::default(),
        }
    }

    /// All downsampled rows ordered by sensor, then minute.
    pub fn points(&self) -> Result<Vec<DownsampledPoint>, StoreError> {
        Ok(self.read_points()?.values().cloned().collect())
    }

    pub fn point(
        &self,
        sensor_id: &str,
        minute: DateTime<Utc>,
    ) -> Result<Option<DownsampledPoint>, StoreError> {
        Ok(self
            .read_points()?
            .get(&(sensor_id.to_string(), minute))
            .cloned())
    }

    pub fn raw_len(&self) -> Result<usize, StoreError> {
        Ok(self.read_raw()?.len())
    }

    fn read_raw(&self) -> Result<RwLockReadGuard<'_, Vec<RawRecord>>, StoreError> {
        self.raw
            .read()
            .map_err(|_| StoreError::unavailable("raw readings lock poisoned"))
    }

    fn read_points(
        &self,
    ) -> Result<RwLockReadGuard<'_, BTreeMap<PointKey, DownsampledPoint>>, StoreError> {
        self.points
            .read()
            .map_err(|_| StoreError::unavailable("downsampled readings lock poisoned"))
    }

    fn write_points(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<PointKey, DownsampledPoint>>, StoreError> {
        self.points
            .write()
            .map_err(|_| StoreError::unavailable("downsampled readings lock poisoned"))
    }
}

impl RawReadingStore for MemoryWarehouse {
    fn raw_time_bounds(&self) -> Result<Option<TimeBounds>, StoreError> {
        let raw = self.read_raw()?;
        let earliest = raw.iter().map(|r| r.timestamp).min();
        let latest = raw.iter().map(|r| r.timestamp).max();
        Ok(earliest.zip(latest).map(|(earliest, latest)| TimeBounds { earliest, latest }))
    }

    fn scan_raw(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let mut rows: Vec<RawRecord> = self
            .read_raw()?
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    fn latest_raw_by_sensor_since(
        &self,
        from: DateTime<Utc>,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError> {
        let mut latest: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for record in self.read_raw()?.iter().filter(|r| r.timestamp >= from) {
            let Ok(reading) = record.clone().validate() else {
                continue;
            };
            let entry = latest.entry(reading.sensor_id).or_insert(reading.timestamp);
            if reading.timestamp > *entry {
                *entry = reading.timestamp;
            }
        }
        Ok(latest)
    }

    fn earliest_raw_since(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .read_raw()?
            .iter()
            .filter(|r| r.timestamp >= from && r.is_valid())
            .map(|r| r.timestamp)
            .min())
    }
}

impl RawReadingSink for MemoryWarehouse {
    fn append_raw(&self, records: &[RawRecord]) -> Result<u64, StoreError> {
        let mut raw = self
            .raw
            .write()
            .map_err(|_| StoreError::unavailable("raw readings lock poisoned"))?;
        raw.extend_from_slice(records);
        Ok(records.len() as u64)
    }
}

impl DownsampledStore for MemoryWarehouse {
    fn max_observation_minute(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .read_points()?
            .values()
            .map(|p| p.observation_minute)
            .max())
    }

    fn last_points_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<DownsampledPoint>, StoreError> {
        let points = self.read_points()?;
        let mut latest: BTreeMap<&str, &DownsampledPoint> = BTreeMap::new();
        for point in points.values().filter(|p| p.observation_minute < before) {
            // Values iterate in (sensor, minute) order, so the last write wins.
            latest.insert(point.sensor_id.as_str(), point);
        }
        Ok(latest.into_values().cloned().collect())
    }

    fn points_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DownsampledPoint>, StoreError> {
        Ok(self
            .read_points()?
            .values()
            .filter(|p| p.observation_minute >= start && p.observation_minute < end)
            .cloned()
            .collect())
    }

    fn upsert_points(&self, points: &[DownsampledPoint]) -> Result<u64, StoreError> {
        let mut stored = self.write_points()?;
        for point in points {
            stored.insert(
                (point.sensor_id.clone(), point.observation_minute),
                point.clone(),
            );
        }
        Ok(points.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, m, 0).unwrap()
    }

    fn point(sensor: &str, m: u32, value: f64) -> DownsampledPoint {
        DownsampledPoint {
            observation_minute: at(m),
            sensor_id: sensor.to_string(),
            sensor_set_id: "set".to_string(),
            smoothed_light_intensity: value,
            last_updated: at(59),
        }
    }

    #[test]
    fn test_upsert_replaces_by_key() {
        let store = MemoryWarehouse::new();
        store.upsert_points(&[point("A", 0, 1.0), point("A", 1, 2.0)]).unwrap();
        store.upsert_points(&[point("A", 1, 3.0)]).unwrap();

        let points = store.points().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].smoothed_light_intensity, 3.0);
        assert_eq!(store.max_observation_minute().unwrap(), Some(at(1)));
    }

    #[test]
    fn test_last_points_before_is_per_sensor_and_strict() {
        let store = MemoryWarehouse::new();
        store
            .upsert_points(&[
                point("A", 0, 1.0),
                point("A", 3, 2.0),
                point("A", 5, 9.0),
                point("B", 1, 5.0),
            ])
            .unwrap();

        let seeds = store.last_points_before(at(5)).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].sensor_id, "A");
        assert_eq!(seeds[0].observation_minute, at(3));
        assert_eq!(seeds[1].observation_minute, at(1));
    }

    #[test]
    fn test_latest_raw_ignores_malformed_rows() {
        let mut bad = RawRecord::new("B", "set", at(9), 1.0);
        bad.light_intensity = None;
        let store = MemoryWarehouse::with_raw([
            RawRecord::new("A", "set", at(4), 1.0),
            RawRecord::new("A", "set", at(7), 1.0),
            RawRecord::new("A", "set", at(2), 1.0),
            bad,
        ]);

        let latest = store.latest_raw_by_sensor_since(at(3)).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["A"], at(7));

        let bounds = store.raw_time_bounds().unwrap().unwrap();
        assert_eq!(bounds.earliest, at(2));
        assert_eq!(bounds.latest, at(9));
    }

    #[test]
    fn test_earliest_raw_since_skips_malformed_rows() {
        let store = MemoryWarehouse::with_raw([
            RawRecord::new("A", "set", at(1), 1.0),
            RawRecord::new("A", "\t", at(3), 1.0),
            RawRecord::new("B", "set", at(8), 1.0),
            RawRecord::new("B", "set", at(5), 1.0),
        ]);

        assert_eq!(store.earliest_raw_since(at(2)).unwrap(), Some(at(5)));
        assert_eq!(store.earliest_raw_since(at(9)).unwrap(), None);
    }
}
