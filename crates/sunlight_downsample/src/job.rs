//! One downsampling invocation, end to end.
//!
//! plan window → load state → scan and aggregate → scaffold → fill → merge
//!
//! A run is stateless between invocations: everything it needs is re-read
//! from the stores, so any run can be retried after a failure.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::aggregate::MinuteAggregator;
use crate::config::DownsampleConfig;
use crate::error::Result;
use crate::fill::fill_gaps;
use crate::merge::{MergeOutcome, MergePlan, MergeWriter};
use crate::scaffold::Scaffold;
use crate::state::load_sensor_state;
use crate::store::{DownsampledStore, RawReadingStore};
use crate::window::{IdleReason, ProcessingWindow, WindowPlan, WindowPlanner};

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub window: Option<ProcessingWindow>,
    pub idle_reason: Option<IdleReason>,
    pub dry_run: bool,
    pub raw_rows_scanned: usize,
    pub malformed_rows: usize,
    pub sensors: usize,
    pub seeded_sensors: usize,
    pub scaffold_cells: usize,
    pub real_points: usize,
    pub filled_points: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub duration_ms: u64,
}

impl RunReport {
    fn idle(reason: IdleReason, dry_run: bool) -> Self {
        Self {
            idle_reason: Some(reason),
            dry_run,
            ..Self::default()
        }
    }

    /// True when the planner found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.window.is_none()
    }

    pub fn rows_written(&self) -> usize {
        self.inserted + self.updated
    }
}

pub struct DownsampleJob<'a, R: ?Sized, D: ?Sized> {
    raw: &'a R,
    downsampled: &'a D,
    planner: WindowPlanner,
    aggregator: MinuteAggregator,
    writer: MergeWriter,
    dry_run: bool,
}

impl<'a, R, D> DownsampleJob<'a, R, D>
where
    R: RawReadingStore + ?Sized,
    D: DownsampledStore + ?Sized,
{
    pub fn new(raw: &'a R, downsampled: &'a D, config: &DownsampleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            raw,
            downsampled,
            planner: WindowPlanner::new(config.max_span()),
            aggregator: MinuteAggregator::new(config.aggregation),
            writer: MergeWriter::new(config.merge_batch_rows),
            dry_run: false,
        })
    }

    /// Compute everything but write nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn plan(&self) -> Result<WindowPlan> {
        Ok(self.planner.plan(self.raw, self.downsampled)?)
    }

    pub fn run(&self) -> Result<RunReport> {
        self.run_at(Utc::now())
    }

    /// Run with `now` stamped as `last_updated` on written rows.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let started = Instant::now();
        let window = match self.plan()? {
            WindowPlan::Ready { window } => window,
            WindowPlan::Idle { reason } => {
                info!(%reason, "Nothing to downsample");
                return Ok(RunReport::idle(reason, self.dry_run));
            }
        };

        let span = info_span!(
            "downsample.run",
            window_start = %window.start().to_rfc3339(),
            window_end = %window.end().to_rfc3339(),
            dry_run = self.dry_run
        );
        let _guard = span.enter();

        let state = load_sensor_state(self.raw, self.downsampled, &window)?;
        let records = self.raw.scan_raw(window.start(), window.end())?;
        let aggregated = self.aggregator.aggregate(&window, records);
        if aggregated.malformed > 0 {
            warn!(
                malformed = aggregated.malformed,
                "Skipped malformed raw readings"
            );
        }

        let scaffold = Scaffold::build(window, &aggregated, state.seeds());
        let sensors = scaffold.sensor_count();
        let scaffold_cells = scaffold.cell_count();
        let filled = fill_gaps(scaffold, &state);

        let existing = self
            .downsampled
            .points_in_range(window.start(), window.end())?;
        let plan = MergePlan::build(&filled.points, existing, now)?;
        let outcome = if self.dry_run {
            MergeOutcome::planned(&plan)
        } else {
            self.writer.apply(self.downsampled, plan)?
        };

        let report = RunReport {
            window: Some(window),
            idle_reason: None,
            dry_run: self.dry_run,
            raw_rows_scanned: aggregated.scanned,
            malformed_rows: aggregated.malformed,
            sensors,
            seeded_sensors: state.seeds().len(),
            scaffold_cells,
            real_points: filled.real_count(),
            filled_points: filled.filled_count(),
            inserted: outcome.inserted,
            updated: outcome.updated,
            unchanged: outcome.unchanged,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            sensors = report.sensors,
            real = report.real_points,
            filled = report.filled_points,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            duration_ms = report.duration_ms,
            "Downsample run complete"
        );
        Ok(report)
    }

    /// Repeat runs until the window start stops moving, up to `max_runs`.
    ///
    /// A backlog longer than the span cap takes several windows to clear.
    pub fn catch_up(&self, max_runs: usize) -> Result<Vec<RunReport>> {
        self.catch_up_at(Utc::now(), max_runs)
    }

    pub fn catch_up_at(&self, now: DateTime<Utc>, max_runs: usize) -> Result<Vec<RunReport>> {
        let mut reports = Vec::new();
        let mut previous_start = None;
        for _ in 0..max_runs {
            let report = self.run_at(now)?;
            let start = report.window.map(|w| w.start());
            let settled = start.is_none() || start == previous_start;
            reports.push(report);
            // A dry run never advances the store, so one pass is all it can show.
            if settled || self.dry_run {
                break;
            }
            previous_start = start;
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryWarehouse, RawReadingSink};
    use crate::types::{DownsampledPoint, RawRecord};
    use chrono::TimeZone;

    fn at(m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, m, s).unwrap()
    }

    fn config() -> DownsampleConfig {
        DownsampleConfig::default()
    }

    #[test]
    fn test_empty_raw_store_is_idle() {
        let store = MemoryWarehouse::new();
        let report = DownsampleJob::new(&store, &store, &config())
            .unwrap()
            .run_at(at(30, 0))
            .unwrap();
        assert!(report.is_idle());
        assert_eq!(report.idle_reason, Some(IdleReason::NoRawData));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = MemoryWarehouse::new();
        let bad = DownsampleConfig {
            max_span_minutes: 0,
            ..config()
        };
        assert!(DownsampleJob::new(&store, &store, &bad).is_err());
    }

    #[test]
    fn test_dry_run_reports_without_writing() {
        let store = MemoryWarehouse::with_raw([
            RawRecord::new("A", "set", at(0, 10), 1.0),
            RawRecord::new("A", "set", at(2, 10), 2.0),
        ]);
        let job = DownsampleJob::new(&store, &store, &config())
            .unwrap()
            .dry_run(true);

        let report = job.run_at(at(30, 0)).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.real_points, 2);
        assert_eq!(report.filled_points, 1);
        assert!(store.points().unwrap().is_empty());

        let reports = job.catch_up_at(at(30, 0), 10).unwrap();
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn test_rerun_leaves_last_updated_alone() {
        let store = MemoryWarehouse::new();
        store
            .append_raw(&[
                RawRecord::new("A", "set", at(0, 10), 1.0),
                RawRecord::new("A", "set", at(3, 10), 2.0),
            ])
            .unwrap();
        let job = DownsampleJob::new(&store, &store, &config()).unwrap();

        job.run_at(at(30, 0)).unwrap();
        let first: Vec<DownsampledPoint> = store.points().unwrap();
        let report = job.run_at(at(45, 0)).unwrap();

        assert_eq!(report.rows_written(), 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(store.points().unwrap(), first);
    }

    #[test]
    fn test_catch_up_stops_when_window_settles() {
        let store = MemoryWarehouse::with_raw([
            RawRecord::new("A", "set", at(0, 0), 1.0),
            RawRecord::new("A", "set", at(9, 0), 2.0),
        ]);
        let narrow = DownsampleConfig {
            max_span_minutes: 4,
            ..config()
        };
        let reports = DownsampleJob::new(&store, &store, &narrow)
            .unwrap()
            .catch_up_at(at(30, 0), 100)
            .unwrap();

        // [0,4) [3,7) [6,9:00.000001) [9, ..) then a repeat of [9, ..)
        assert_eq!(reports.len(), 5);
        assert_eq!(store.points().unwrap().len(), 10);
        assert_eq!(store.max_observation_minute().unwrap(), Some(at(9, 0)));
    }
}
