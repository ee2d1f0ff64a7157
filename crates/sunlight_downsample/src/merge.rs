//! Idempotent merge of gap-filled points into the downsampled store.
//!
//! Output rows are compared with what is already stored for the window.
//! Rows whose value and sensor set match are left alone, so re-running a
//! window does not touch `last_updated`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{DownsampleError, StoreError};
use crate::fill::FilledPoint;
use crate::store::DownsampledStore;
use crate::types::DownsampledPoint;

#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub inserts: Vec<DownsampledPoint>,
    pub updates: Vec<DownsampledPoint>,
    pub unchanged: usize,
}

impl MergePlan {
    /// Classify `points` against `existing` rows in the same window.
    ///
    /// Fails if `points` repeats a `(observation_minute, sensor_id)` key.
    pub fn build(
        points: &[FilledPoint],
        existing: Vec<DownsampledPoint>,
        now: DateTime<Utc>,
    ) -> Result<Self, DownsampleError> {
        let existing: BTreeMap<(DateTime<Utc>, String), DownsampledPoint> = existing
            .into_iter()
            .map(|p| ((p.observation_minute, p.sensor_id.clone()), p))
            .collect();

        let mut seen = BTreeSet::new();
        let mut plan = MergePlan::default();
        for point in points {
            let key = (point.observation_minute, point.sensor_id.clone());
            if !seen.insert(key.clone()) {
                return Err(DownsampleError::invariant(format!(
                    "duplicate output row for sensor {} at {}",
                    point.sensor_id,
                    point.observation_minute.to_rfc3339()
                )));
            }

            let row = DownsampledPoint {
                observation_minute: point.observation_minute,
                sensor_id: point.sensor_id.clone(),
                sensor_set_id: point.sensor_set_id.clone(),
                smoothed_light_intensity: point.value,
                last_updated: now,
            };
            match existing.get(&key) {
                None => plan.inserts.push(row),
                Some(current) if same_content(current, &row) => plan.unchanged += 1,
                Some(_) => plan.updates.push(row),
            }
        }
        Ok(plan)
    }

    pub fn write_count(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }

    pub fn is_noop(&self) -> bool {
        self.write_count() == 0
    }
}

fn same_content(a: &DownsampledPoint, b: &DownsampledPoint) -> bool {
    a.smoothed_light_intensity.to_bits() == b.smoothed_light_intensity.to_bits()
        && a.sensor_set_id == b.sensor_set_id
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub batches: usize,
}

impl MergeOutcome {
    /// What a write of `plan` would report, without writing.
    pub fn planned(plan: &MergePlan) -> Self {
        Self {
            inserted: plan.inserts.len(),
            updated: plan.updates.len(),
            unchanged: plan.unchanged,
            batches: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MergeWriter {
    batch_rows: usize,
}

impl MergeWriter {
    pub fn new(batch_rows: usize) -> Self {
        Self {
            batch_rows: batch_rows.max(1),
        }
    }

    /// Write inserts and updates in batches, oldest minute first.
    ///
    /// Each batch is atomic. If a batch fails, every minute before the
    /// newest written one is complete for all sensors, and the next run
    /// restarts from that newest minute, so the store converges.
    pub fn apply<D>(&self, store: &D, plan: MergePlan) -> Result<MergeOutcome, StoreError>
    where
        D: DownsampledStore + ?Sized,
    {
        let mut outcome = MergeOutcome::planned(&plan);
        let mut rows: Vec<DownsampledPoint> =
            plan.inserts.into_iter().chain(plan.updates).collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        for batch in rows.chunks(self.batch_rows) {
            let written = store.upsert_points(batch)?;
            outcome.batches += 1;
            debug!(batch = outcome.batches, rows = written, "Merged batch");
        }
        Ok(outcome)
    }
}
