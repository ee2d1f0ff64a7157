//! Minute aggregation.
//!
//! Raw readings are grouped by (sensor, observation minute) and reduced to
//! one value under the configured policy. Readings inside a group are put in
//! a canonical order first (timestamp, then value) so the result does not
//! depend on scan order and re-aggregating a minute is bit-for-bit stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AggregationPolicy;
use crate::time::truncate_to_minute;
use crate::types::{RawReading, RawRecord};
use crate::window::ProcessingWindow;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinuteAggregate {
    pub observation_minute: DateTime<Utc>,
    pub sensor_id: String,
    /// Taken from the latest reading in the minute.
    pub sensor_set_id: String,
    pub value: f64,
    pub reading_count: usize,
}

/// Aggregates for one window, grouped by sensor in minute order.
#[derive(Debug, Default)]
pub struct AggregatedWindow {
    pub by_sensor: BTreeMap<String, Vec<MinuteAggregate>>,
    pub scanned: usize,
    pub malformed: usize,
    pub out_of_window: usize,
}

impl AggregatedWindow {
    pub fn aggregate_count(&self) -> usize {
        self.by_sensor.values().map(Vec::len).sum()
    }

    pub fn sensor(&self, sensor_id: &str) -> &[MinuteAggregate] {
        self.by_sensor
            .get(sensor_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MinuteAggregator {
    policy: AggregationPolicy,
}

impl MinuteAggregator {
    pub fn new(policy: AggregationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    pub fn aggregate(&self, window: &ProcessingWindow, records: Vec<RawRecord>) -> AggregatedWindow {
        let mut out = AggregatedWindow {
            scanned: records.len(),
            ..AggregatedWindow::default()
        };

        let mut groups: BTreeMap<(String, DateTime<Utc>), Vec<RawReading>> = BTreeMap::new();
        for record in records {
            let timestamp = record.timestamp;
            let reading = match record.validate() {
                Ok(reading) => reading,
                Err(reason) => {
                    warn!(timestamp = %timestamp.to_rfc3339(), %reason, "Skipping malformed raw reading");
                    out.malformed += 1;
                    continue;
                }
            };
            if !window.contains(reading.timestamp) {
                debug!(
                    sensor_id = %reading.sensor_id,
                    timestamp = %reading.timestamp.to_rfc3339(),
                    "Ignoring reading outside window"
                );
                out.out_of_window += 1;
                continue;
            }
            let minute = truncate_to_minute(reading.timestamp);
            groups
                .entry((reading.sensor_id.clone(), minute))
                .or_default()
                .push(reading);
        }

        for ((sensor_id, observation_minute), mut readings) in groups {
            readings.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.light_intensity.total_cmp(&b.light_intensity))
            });
            let Some(latest) = readings.last() else {
                continue;
            };
            let aggregate = MinuteAggregate {
                observation_minute,
                sensor_id: sensor_id.clone(),
                sensor_set_id: latest.sensor_set_id.clone(),
                value: reduce(self.policy, &readings),
                reading_count: readings.len(),
            };
            out.by_sensor.entry(sensor_id).or_default().push(aggregate);
        }

        out
    }
}

/// `readings` is non-empty and canonically ordered.
fn reduce(policy: AggregationPolicy, readings: &[RawReading]) -> f64 {
    match policy {
        AggregationPolicy::Mean => {
            let sum: f64 = readings.iter().map(|r| r.light_intensity).sum();
            sum / readings.len() as f64
        }
        AggregationPolicy::FirstArrival => readings[0].light_intensity,
    }
}
