//! Storage seams.
//!
//! The pipeline only talks to the warehouse through these traits:
//! - `RawReadingStore`: range reads over append-only raw readings
//! - `RawReadingSink`: appends from ingestion
//! - `DownsampledStore`: reads and keyed upserts of per-minute rows
//!
//! `MemoryWarehouse` backs unit and property tests; `DuckDbWarehouse` is the
//! production backend.

mod memory;
mod warehouse;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::types::{DownsampledPoint, RawRecord};

pub use self::memory::MemoryWarehouse;
pub use self::warehouse::{DuckDbWarehouse, WarehouseSummary};

/// Oldest and newest raw reading timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeBounds {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

pub trait RawReadingStore {
    /// Timestamp range across every stored row, `None` when empty.
    fn raw_time_bounds(&self) -> Result<Option<TimeBounds>, StoreError>;

    /// All rows with `start <= timestamp < end`, malformed ones included.
    fn scan_raw(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, StoreError>;

    /// Newest valid reading per sensor at or after `from`.
    fn latest_raw_by_sensor_since(
        &self,
        from: DateTime<Utc>,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError>;

    /// Oldest valid reading timestamp at or after `from`.
    fn earliest_raw_since(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StoreError>;
}

pub trait RawReadingSink {
    /// Append rows, returning how many were written.
    fn append_raw(&self, records: &[RawRecord]) -> Result<u64, StoreError>;
}

pub trait DownsampledStore {
    fn max_observation_minute(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// The newest row per sensor strictly before `before`.
    fn last_points_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<DownsampledPoint>, StoreError>;

    /// Rows with `start <= observation_minute < end`.
    fn points_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DownsampledPoint>, StoreError>;

    /// Insert or replace rows by `(observation_minute, sensor_id)` atomically.
    fn upsert_points(&self, points: &[DownsampledPoint]) -> Result<u64, StoreError>;
}
