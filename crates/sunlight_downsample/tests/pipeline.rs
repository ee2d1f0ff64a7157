//! End-to-end behaviour of the downsampling pipeline against the in-memory
//! warehouse.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use sunlight_downsample::{
    DownsampleConfig, DownsampleJob, DownsampledPoint, DownsampledStore, MemoryWarehouse,
    RawReadingSink, RawReadingStore, RawRecord, StoreError, TimeBounds,
};

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn reading(sensor: &str, ts: DateTime<Utc>, value: f64) -> RawRecord {
    RawRecord::new(sensor, "roof", ts, value)
}

fn stored(sensor: &str, minute: DateTime<Utc>, value: f64) -> DownsampledPoint {
    DownsampledPoint {
        observation_minute: minute,
        sensor_id: sensor.to_string(),
        sensor_set_id: "roof".to_string(),
        smoothed_light_intensity: value,
        last_updated: at(0, 0, 0),
    }
}

fn config_with_span(minutes: u32) -> DownsampleConfig {
    DownsampleConfig {
        max_span_minutes: minutes,
        ..DownsampleConfig::default()
    }
}

/// Run until the window start stops advancing.
fn drain(store: &MemoryWarehouse, config: &DownsampleConfig) {
    DownsampleJob::new(store, store, config)
        .unwrap()
        .catch_up_at(now(), 100_000)
        .unwrap();
}

/// (sensor, minute, value bits, sensor set) for every stored row.
fn contents(store: &MemoryWarehouse) -> Vec<(String, DateTime<Utc>, u64, String)> {
    store
        .points()
        .unwrap()
        .into_iter()
        .map(|p| {
            (
                p.sensor_id,
                p.observation_minute,
                p.smoothed_light_intensity.to_bits(),
                p.sensor_set_id,
            )
        })
        .collect()
}

fn series(store: &MemoryWarehouse, sensor: &str) -> Vec<(DateTime<Utc>, f64)> {
    store
        .points()
        .unwrap()
        .into_iter()
        .filter(|p| p.sensor_id == sensor)
        .map(|p| (p.observation_minute, p.smoothed_light_intensity))
        .collect()
}

#[test]
fn test_late_reading_overwrites_recomputed_minute() {
    let store = MemoryWarehouse::with_raw([
        reading("A", at(10, 0, 55), 999.0),
        reading("A", at(10, 1, 15), 105.0),
        reading("A", at(10, 1, 45), 115.0),
        reading("A", at(10, 3, 30), 120.0),
        reading("B", at(10, 0, 30), 50.0),
    ]);
    store.upsert_points(&[stored("A", at(10, 0, 0), 100.0)]).unwrap();

    let report = DownsampleJob::new(&store, &store, &DownsampleConfig::default())
        .unwrap()
        .run_at(now())
        .unwrap();

    assert_eq!(
        series(&store, "A"),
        vec![
            (at(10, 0, 0), 999.0),
            (at(10, 1, 0), 110.0),
            (at(10, 2, 0), 110.0),
            (at(10, 3, 0), 120.0),
        ]
    );
    assert_eq!(series(&store, "B"), vec![(at(10, 0, 0), 50.0)]);
    assert_eq!(store.points().unwrap().len(), 5);

    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 4);
    assert_eq!(report.real_points, 4);
    assert_eq!(report.filled_points, 1);
    assert_eq!(
        store.point("A", at(10, 0, 0)).unwrap().unwrap().last_updated,
        now()
    );
}

#[test]
fn test_second_run_changes_nothing() {
    let store = MemoryWarehouse::with_raw([
        reading("A", at(10, 0, 10), 1.0),
        reading("A", at(10, 7, 10), 2.0),
        reading("B", at(10, 2, 10), 3.0),
    ]);
    let job = DownsampleJob::new(&store, &store, &DownsampleConfig::default()).unwrap();

    job.run_at(now()).unwrap();
    let first = store.points().unwrap();
    let again = job.run_at(now() + Duration::hours(1)).unwrap();

    assert_eq!(again.rows_written(), 0);
    assert_eq!(store.points().unwrap(), first);
}

#[test]
fn test_gap_between_two_readings_is_filled() {
    let store = MemoryWarehouse::with_raw([
        reading("A", at(10, 0, 0), 10.0),
        reading("A", at(10, 15, 0), 15.0),
    ]);
    drain(&store, &DownsampleConfig::default());

    let a = series(&store, "A");
    assert_eq!(a.len(), 16);
    assert!(a[..15].iter().all(|(_, v)| *v == 10.0));
    assert_eq!(a[15], (at(10, 15, 0), 15.0));
}

#[test]
fn test_nothing_is_written_past_last_real_minute() {
    let store = MemoryWarehouse::with_raw([
        reading("A", at(10, 0, 0), 1.0),
        reading("A", at(10, 20, 0), 2.0),
        reading("B", at(10, 5, 0), 3.0),
    ]);
    drain(&store, &DownsampleConfig::default());

    // B went quiet after 10:05 while A kept reporting.
    assert_eq!(series(&store, "B"), vec![(at(10, 5, 0), 3.0)]);
    assert_eq!(series(&store, "A").last(), Some(&(at(10, 20, 0), 2.0)));
}

#[test]
fn test_gap_across_runs_is_filled_from_stored_state() {
    let store = MemoryWarehouse::with_raw([
        reading("A", at(10, 0, 0), 1.0),
        reading("A", at(10, 5, 0), 5.0),
    ]);
    let config = DownsampleConfig::default();
    drain(&store, &config);
    assert_eq!(store.max_observation_minute().unwrap(), Some(at(10, 5, 0)));

    store.append_raw(&[reading("A", at(10, 10, 0), 10.0)]).unwrap();
    drain(&store, &config);

    let a = series(&store, "A");
    assert_eq!(a.len(), 11);
    for minute in 6..10 {
        assert_eq!(a[minute].1, 5.0, "minute {minute}");
    }
    assert_eq!(a[10], (at(10, 10, 0), 10.0));
}

#[test]
fn test_silence_longer_than_span_matches_single_pass() {
    let start = at(0, 0, 0);
    let raw = [
        reading("A", start, 42.0),
        reading("A", start + Duration::days(40), 7.0),
    ];

    let chunked = MemoryWarehouse::with_raw(raw.clone());
    drain(&chunked, &DownsampleConfig::default());

    let single = MemoryWarehouse::with_raw(raw);
    drain(&single, &config_with_span(60 * 24 * 365));

    let minutes = 40 * 24 * 60 + 1;
    assert_eq!(chunked.points().unwrap().len(), minutes);
    assert_eq!(contents(&chunked), contents(&single));
    assert_eq!(
        chunked
            .point("A", start + Duration::days(10))
            .unwrap()
            .map(|p| p.smoothed_light_intensity),
        Some(42.0)
    );
}

#[test]
fn test_sensor_appearing_after_long_gap_is_reached() {
    let start = at(0, 0, 0);
    let later = start + Duration::days(40);
    let raw = [
        reading("A", start, 42.0),
        reading("B", later, 10.0),
        reading("B", later + Duration::minutes(5), 20.0),
    ];

    let chunked = MemoryWarehouse::with_raw(raw.clone());
    drain(&chunked, &DownsampleConfig::default());

    let single = MemoryWarehouse::with_raw(raw);
    drain(&single, &config_with_span(60 * 24 * 365));

    assert_eq!(series(&chunked, "A"), vec![(start, 42.0)]);
    let b = series(&chunked, "B");
    assert_eq!(b.len(), 6);
    assert_eq!(b[0], (later, 10.0));
    assert_eq!(b[5], (later + Duration::minutes(5), 20.0));
    assert_eq!(contents(&chunked), contents(&single));
}

#[test]
fn test_each_run_is_bounded_by_span() {
    let start = at(0, 0, 0);
    let store = MemoryWarehouse::with_raw([
        reading("A", start, 1.0),
        reading("B", start, 1.0),
        reading("A", start + Duration::days(40), 1.0),
    ]);
    let reports = DownsampleJob::new(&store, &store, &DownsampleConfig::default())
        .unwrap()
        .catch_up_at(now(), 10)
        .unwrap();

    assert!(reports.len() >= 2);
    for report in &reports {
        assert!(report.scaffold_cells <= report.sensors * 30 * 24 * 60);
        if let Some(window) = report.window {
            assert!(window.end() - window.start() <= Duration::days(30));
        }
    }
}

#[test]
fn test_malformed_rows_do_not_block_progress() {
    let mut missing = reading("A", at(10, 1, 0), 0.0);
    missing.light_intensity = None;
    let mut nan = reading("A", at(10, 2, 0), 0.0);
    nan.light_intensity = Some(f64::NAN);
    let mut anonymous = reading("A", at(10, 2, 30), 0.0);
    anonymous.sensor_id = None;

    let store = MemoryWarehouse::with_raw([
        reading("A", at(10, 0, 0), 4.0),
        missing,
        nan,
        anonymous,
        reading("A", at(10, 3, 0), 8.0),
    ]);
    let report = DownsampleJob::new(&store, &store, &DownsampleConfig::default())
        .unwrap()
        .run_at(now())
        .unwrap();

    assert_eq!(report.malformed_rows, 3);
    assert_eq!(
        series(&store, "A"),
        vec![
            (at(10, 0, 0), 4.0),
            (at(10, 1, 0), 4.0),
            (at(10, 2, 0), 4.0),
            (at(10, 3, 0), 8.0),
        ]
    );
}

#[test]
fn test_lagging_sensor_is_not_backfilled_below_window_start() {
    // The window is global: once A has advanced the store, a late batch for
    // B older than the newest stored minute is not revisited.
    let store = MemoryWarehouse::with_raw([
        reading("A", at(10, 0, 0), 1.0),
        reading("A", at(10, 30, 0), 1.0),
    ]);
    let config = DownsampleConfig::default();
    drain(&store, &config);

    store.append_raw(&[reading("B", at(10, 10, 0), 9.0)]).unwrap();
    drain(&store, &config);

    assert!(series(&store, "B").is_empty());
}

/// Downsampled store that fails the Nth upsert call.
struct FlakyStore {
    inner: MemoryWarehouse,
    calls: AtomicUsize,
    fail_on_call: usize,
}

impl RawReadingStore for FlakyStore {
    fn raw_time_bounds(&self) -> Result<Option<TimeBounds>, StoreError> {
        self.inner.raw_time_bounds()
    }

    fn scan_raw(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, StoreError> {
        self.inner.scan_raw(start, end)
    }

    fn latest_raw_by_sensor_since(
        &self,
        from: DateTime<Utc>,
    ) -> Result<std::collections::BTreeMap<String, DateTime<Utc>>, StoreError> {
        self.inner.latest_raw_by_sensor_since(from)
    }

    fn earliest_raw_since(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.earliest_raw_since(from)
    }
}

impl DownsampledStore for FlakyStore {
    fn max_observation_minute(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.max_observation_minute()
    }

    fn last_points_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<DownsampledPoint>, StoreError> {
        self.inner.last_points_before(before)
    }

    fn points_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DownsampledPoint>, StoreError> {
        self.inner.points_in_range(start, end)
    }

    fn upsert_points(&self, points: &[DownsampledPoint]) -> Result<u64, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_call {
            return Err(StoreError::unavailable("injected write failure"));
        }
        self.inner.upsert_points(points)
    }
}

#[test]
fn test_failed_write_converges_on_retry() {
    let raw = vec![
        reading("A", at(10, 0, 0), 1.0),
        reading("B", at(10, 0, 0), 2.0),
        reading("A", at(10, 6, 0), 3.0),
        reading("B", at(10, 6, 0), 4.0),
    ];
    let config = DownsampleConfig {
        merge_batch_rows: 3,
        ..DownsampleConfig::default()
    };

    let flaky = FlakyStore {
        inner: MemoryWarehouse::with_raw(raw.clone()),
        calls: AtomicUsize::new(0),
        fail_on_call: 2,
    };
    let job = DownsampleJob::new(&flaky, &flaky, &config).unwrap();
    let err = job.run_at(now()).unwrap_err();
    assert!(err.is_transient());
    assert_eq!(flaky.inner.points().unwrap().len(), 3);

    job.catch_up_at(now(), 10).unwrap();

    let clean = MemoryWarehouse::with_raw(raw);
    drain(&clean, &config);
    assert_eq!(contents(&flaky.inner), contents(&clean));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Draining with a small span gives the same series as one unbounded pass.
    #[test]
    fn prop_chunked_runs_match_single_pass(
        readings in prop::collection::vec(
            (0usize..4, 0i64..(6 * 60 * 60), 0.0f64..10_000.0),
            1..60,
        ),
        span in 2u32..90,
    ) {
        let base = at(6, 0, 0);
        let raw: Vec<RawRecord> = readings
            .iter()
            .map(|(sensor, secs, value)| {
                reading(&format!("S{sensor}"), base + Duration::seconds(*secs), *value)
            })
            .collect();

        let chunked = MemoryWarehouse::with_raw(raw.clone());
        drain(&chunked, &config_with_span(span));

        let single = MemoryWarehouse::with_raw(raw);
        drain(&single, &config_with_span(60 * 24 * 365));

        prop_assert_eq!(contents(&chunked), contents(&single));

        let last_real = readings.iter().map(|(_, secs, _)| base + Duration::seconds(*secs)).max();
        let last_stored = chunked.max_observation_minute().unwrap();
        prop_assert_eq!(last_stored, last_real.map(sunlight_downsample::truncate_to_minute));
    }
}
