//! Window planning.
//!
//! One run processes the half-open range `[start, end)`. The start is the
//! newest minute already in the downsampled store, so that minute is
//! recomputed and late readings for it are folded in. The end is capped at
//! `start + max_span` and never runs past the newest raw reading. When no
//! sensor could carry values across a silence longer than the span, the
//! start jumps to the minute of the next valid reading instead.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{DownsampledStore, RawReadingStore, TimeBounds};
use crate::time::{minutes_between, truncate_to_minute, MICROS_PER_MINUTE};

/// Half-open time range `[start, end)` with a minute-aligned start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessingWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ProcessingWindow {
    /// Returns `None` for an empty range.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        let start = truncate_to_minute(start);
        (end > start).then_some(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Number of observation minutes in the window. A trailing partial
    /// minute counts.
    pub fn minute_count(&self) -> usize {
        minutes_between(self.start, self.end)
    }

    pub fn minute_at(&self, index: usize) -> DateTime<Utc> {
        self.start + Duration::minutes(index as i64)
    }

    pub fn last_minute(&self) -> DateTime<Utc> {
        self.minute_at(self.minute_count().saturating_sub(1))
    }

    /// Grid column for `minute`, if it is an aligned minute inside the window.
    pub fn index_of(&self, minute: DateTime<Utc>) -> Option<usize> {
        if !self.contains(minute) {
            return None;
        }
        let offset = minute.timestamp_micros() - self.start.timestamp_micros();
        (offset % MICROS_PER_MINUTE == 0).then_some((offset / MICROS_PER_MINUTE) as usize)
    }

    pub fn minutes(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.minute_count()).map(move |i| self.minute_at(i))
    }
}

impl std::fmt::Display for ProcessingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Why the planner produced no window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdleReason {
    /// The raw store is empty.
    NoRawData,
    /// Nothing newer than the minute already processed.
    CaughtUp {
        window_start: DateTime<Utc>,
        latest_raw: DateTime<Utc>,
    },
}

impl std::fmt::Display for IdleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdleReason::NoRawData => write!(f, "no raw readings"),
            IdleReason::CaughtUp {
                window_start,
                latest_raw,
            } => write!(
                f,
                "caught up (window start {} is past latest raw reading {})",
                window_start.to_rfc3339(),
                latest_raw.to_rfc3339()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WindowPlan {
    Ready { window: ProcessingWindow },
    Idle { reason: IdleReason },
}

impl WindowPlan {
    pub fn window(&self) -> Option<ProcessingWindow> {
        match self {
            WindowPlan::Ready { window } => Some(*window),
            WindowPlan::Idle { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    max_span: Duration,
}

impl WindowPlanner {
    pub fn new(max_span: Duration) -> Self {
        Self { max_span }
    }

    pub fn max_span(&self) -> Duration {
        self.max_span
    }

    pub fn plan<R, D>(&self, raw: &R, downsampled: &D) -> Result<WindowPlan, StoreError>
    where
        R: RawReadingStore + ?Sized,
        D: DownsampledStore + ?Sized,
    {
        let bounds = raw.raw_time_bounds()?;
        let max_minute = downsampled.max_observation_minute()?;
        let mut plan = self.plan_from(max_minute, bounds);

        // An empty store has not processed its first minute yet.
        if let (Some(window), Some(_)) = (plan.window(), max_minute) {
            if let Some(resume) = self.resume_after_silence(raw, downsampled, window)? {
                info!(
                    stalled_at = %window.start(),
                    resume_at = %resume,
                    "Skipping raw gap longer than the window span"
                );
                plan = self.plan_from(Some(resume), bounds);
            }
        }

        debug!(?max_minute, ?bounds, ?plan, "Planned window");
        Ok(plan)
    }

    /// Minute to restart from when `window` cannot advance the store.
    ///
    /// That happens when every valid reading after the window's first minute
    /// lies beyond `end` and no sensor carried into the window reports again
    /// later, so the fill would stop at the first minute on every run.
    fn resume_after_silence<R, D>(
        &self,
        raw: &R,
        downsampled: &D,
        window: ProcessingWindow,
    ) -> Result<Option<DateTime<Utc>>, StoreError>
    where
        R: RawReadingStore + ?Sized,
        D: DownsampledStore + ?Sized,
    {
        let second_minute = window.start() + Duration::minutes(1);
        let Some(next) = raw.earliest_raw_since(second_minute)? else {
            return Ok(None);
        };
        if next < window.end() {
            return Ok(None);
        }

        let reporting_later = raw.latest_raw_by_sensor_since(window.end())?;
        let seeded = downsampled
            .last_points_before(second_minute)?
            .into_iter()
            .map(|point| point.sensor_id);
        let first_minute = raw
            .scan_raw(window.start(), second_minute)?
            .into_iter()
            .filter_map(|record| record.validate().ok())
            .map(|reading| reading.sensor_id);
        if seeded
            .chain(first_minute)
            .any(|sensor| reporting_later.contains_key(&sensor))
        {
            return Ok(None);
        }

        Ok(Some(truncate_to_minute(next)))
    }

    /// Pure planning step over already-fetched bounds.
    pub fn plan_from(
        &self,
        max_stored_minute: Option<DateTime<Utc>>,
        raw_bounds: Option<TimeBounds>,
    ) -> WindowPlan {
        let Some(bounds) = raw_bounds else {
            return WindowPlan::Idle {
                reason: IdleReason::NoRawData,
            };
        };

        let start = truncate_to_minute(max_stored_minute.unwrap_or(bounds.earliest));
        // Inclusive of the newest raw reading.
        let data_end = bounds.latest + Duration::microseconds(1);
        let end = match start.checked_add_signed(self.max_span) {
            Some(capped) => capped.min(data_end),
            None => data_end,
        };

        match ProcessingWindow::new(start, end) {
            Some(window) => WindowPlan::Ready { window },
            None => WindowPlan::Idle {
                reason: IdleReason::CaughtUp {
                    window_start: start,
                    latest_raw: bounds.latest,
                },
            },
        }
    }
}
