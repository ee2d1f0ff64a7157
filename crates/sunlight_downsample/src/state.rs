//! Per-sensor state carried into a window.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{DownsampledStore, RawReadingStore};
use crate::types::DownsampledPoint;
use crate::window::ProcessingWindow;

/// The last downsampled value a sensor had before the window opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    pub observation_minute: DateTime<Utc>,
    pub sensor_set_id: String,
    pub value: f64,
}

impl From<&DownsampledPoint> for SensorState {
    fn from(point: &DownsampledPoint) -> Self {
        Self {
            observation_minute: point.observation_minute,
            sensor_set_id: point.sensor_set_id.clone(),
            value: point.smoothed_light_intensity,
        }
    }
}

/// Everything a window needs to know about the world outside it.
#[derive(Debug, Clone, Default)]
pub struct LoadedState {
    seeds: BTreeMap<String, SensorState>,
    /// Newest valid raw reading per sensor at or after the window end.
    lookahead: BTreeMap<String, DateTime<Utc>>,
}

impl LoadedState {
    pub fn new(
        seeds: BTreeMap<String, SensorState>,
        lookahead: BTreeMap<String, DateTime<Utc>>,
    ) -> Self {
        Self { seeds, lookahead }
    }

    pub fn seed(&self, sensor_id: &str) -> Option<&SensorState> {
        self.seeds.get(sensor_id)
    }

    pub fn seeds(&self) -> &BTreeMap<String, SensorState> {
        &self.seeds
    }

    pub fn has_lookahead(&self, sensor_id: &str) -> bool {
        self.lookahead.contains_key(sensor_id)
    }

    pub fn lookahead(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.lookahead
    }
}

/// Load seeds (last stored point strictly before the window) and lookahead
/// evidence for every sensor.
pub fn load_sensor_state<R, D>(
    raw: &R,
    downsampled: &D,
    window: &ProcessingWindow,
) -> Result<LoadedState, StoreError>
where
    R: RawReadingStore + ?Sized,
    D: DownsampledStore + ?Sized,
{
    let mut seeds: BTreeMap<String, SensorState> = BTreeMap::new();
    for point in downsampled.last_points_before(window.start())? {
        if point.observation_minute >= window.start() {
            return Err(StoreError::invalid_input(format!(
                "seed for sensor {} at {} is not before window start {}",
                point.sensor_id,
                point.observation_minute.to_rfc3339(),
                window.start().to_rfc3339()
            )));
        }
        match seeds.entry(point.sensor_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(SensorState::from(&point));
            }
            Entry::Occupied(mut slot) => {
                if point.observation_minute > slot.get().observation_minute {
                    slot.insert(SensorState::from(&point));
                }
            }
        }
    }

    let lookahead = raw.latest_raw_by_sensor_since(window.end())?;
    debug!(
        seeds = seeds.len(),
        lookahead = lookahead.len(),
        "Loaded sensor state"
    );
    Ok(LoadedState { seeds, lookahead })
}
