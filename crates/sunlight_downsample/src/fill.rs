//! Last-observation-carried-forward gap filling.
//!
//! Each sensor row is walked once in minute order. Empty cells after a
//! known value (a real cell, or the seed from before the window) become
//! `Filled`. Cells past the sensor's boundary are then cleared again, so
//! nothing is extrapolated beyond the last real evidence.
//!
//! The boundary is the last real minute in the window, or the window's last
//! minute when the raw store proves the sensor reported again at or after
//! the window end.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scaffold::{Cell, Scaffold, SensorRow};
use crate::state::{LoadedState, SensorState};
use crate::window::ProcessingWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Real,
    Filled,
}

/// One output row of the gap filler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledPoint {
    pub observation_minute: DateTime<Utc>,
    pub sensor_id: String,
    pub sensor_set_id: String,
    pub value: f64,
    pub kind: PointKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorBoundary {
    pub sensor_id: String,
    pub last_real: Option<DateTime<Utc>>,
    pub has_lookahead: bool,
    /// Last minute emitted for this sensor, if any.
    pub effective: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct FillOutput {
    pub points: Vec<FilledPoint>,
    pub boundaries: Vec<SensorBoundary>,
}

impl FillOutput {
    pub fn real_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.kind == PointKind::Real)
            .count()
    }

    pub fn filled_count(&self) -> usize {
        self.points.len() - self.real_count()
    }
}

pub fn fill_gaps(mut scaffold: Scaffold, state: &LoadedState) -> FillOutput {
    let window = *scaffold.window();
    let mut out = FillOutput::default();

    for row in scaffold.rows_mut() {
        let seed = state.seed(&row.sensor_id);
        let has_lookahead = state.has_lookahead(&row.sensor_id);
        let boundary = fill_row(&window, row, seed, has_lookahead);
        emit_row(&window, row, &mut out.points);
        out.boundaries.push(boundary);
    }

    out
}

fn fill_row(
    window: &ProcessingWindow,
    row: &mut SensorRow,
    seed: Option<&SensorState>,
    has_lookahead: bool,
) -> SensorBoundary {
    let mut carried: Option<(f64, String)> = seed.map(|s| (s.value, s.sensor_set_id.clone()));
    let mut last_real: Option<usize> = None;

    for (idx, cell) in row.cells.iter_mut().enumerate() {
        match cell {
            Cell::Real {
                value,
                sensor_set_id,
            } => {
                carried = Some((*value, sensor_set_id.clone()));
                last_real = Some(idx);
            }
            Cell::Empty => {
                if let Some((value, sensor_set_id)) = &carried {
                    *cell = Cell::Filled {
                        value: *value,
                        sensor_set_id: sensor_set_id.clone(),
                    };
                }
            }
            Cell::Filled { .. } => {}
        }
    }

    let effective = if has_lookahead && carried.is_some() {
        row.cells.len().checked_sub(1)
    } else {
        last_real
    };

    let keep = effective.map_or(0, |idx| idx + 1);
    for cell in row.cells.iter_mut().skip(keep) {
        *cell = Cell::Empty;
    }

    SensorBoundary {
        sensor_id: row.sensor_id.clone(),
        last_real: last_real.map(|idx| window.minute_at(idx)),
        has_lookahead,
        effective: effective.map(|idx| window.minute_at(idx)),
    }
}

fn emit_row(window: &ProcessingWindow, row: &SensorRow, points: &mut Vec<FilledPoint>) {
    for (idx, cell) in row.cells.iter().enumerate() {
        let (value, sensor_set_id, kind) = match cell {
            Cell::Empty => continue,
            Cell::Real {
                value,
                sensor_set_id,
            } => (*value, sensor_set_id, PointKind::Real),
            Cell::Filled {
                value,
                sensor_set_id,
            } => (*value, sensor_set_id, PointKind::Filled),
        };
        points.push(FilledPoint {
            observation_minute: window.minute_at(idx),
            sensor_id: row.sensor_id.clone(),
            sensor_set_id: sensor_set_id.clone(),
            value,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::aggregate::MinuteAggregator;
    use crate::config::AggregationPolicy;
    use crate::types::RawRecord;
    use chrono::TimeZone;

    fn at(m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, m, s).unwrap()
    }

    fn seed(minute: DateTime<Utc>, value: f64) -> SensorState {
        SensorState {
            observation_minute: minute,
            sensor_set_id: "seed-set".to_string(),
            value,
        }
    }

    fn run(
        window: ProcessingWindow,
        records: Vec<RawRecord>,
        seeds: Vec<(&str, SensorState)>,
        lookahead: Vec<&str>,
    ) -> FillOutput {
        let aggregated = MinuteAggregator::new(AggregationPolicy::Mean).aggregate(&window, records);
        let seeds: BTreeMap<String, SensorState> =
            seeds.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let lookahead = lookahead
            .into_iter()
            .map(|k| (k.to_string(), window.end()))
            .collect();
        let scaffold = Scaffold::build(window, &aggregated, &seeds);
        fill_gaps(scaffold, &LoadedState::new(seeds, lookahead))
    }

    fn values(out: &FillOutput, sensor: &str) -> Vec<(DateTime<Utc>, f64, PointKind)> {
        out.points
            .iter()
            .filter(|p| p.sensor_id == sensor)
            .map(|p| (p.observation_minute, p.value, p.kind))
            .collect()
    }

    #[test]
    fn test_fills_interior_gap_and_stops_at_last_real() {
        let window = ProcessingWindow::new(at(0, 0), at(3, 30) + chrono::Duration::microseconds(1)).unwrap();
        let out = run(
            window,
            vec![
                RawRecord::new("A", "set", at(0, 55), 999.0),
                RawRecord::new("A", "set", at(1, 15), 105.0),
                RawRecord::new("A", "set", at(1, 45), 115.0),
                RawRecord::new("A", "set", at(3, 30), 120.0),
                RawRecord::new("B", "set", at(0, 30), 50.0),
            ],
            vec![],
            vec![],
        );

        assert_eq!(
            values(&out, "A"),
            vec![
                (at(0, 0), 999.0, PointKind::Real),
                (at(1, 0), 110.0, PointKind::Real),
                (at(2, 0), 110.0, PointKind::Filled),
                (at(3, 0), 120.0, PointKind::Real),
            ]
        );
        assert_eq!(values(&out, "B"), vec![(at(0, 0), 50.0, PointKind::Real)]);
        assert_eq!(out.real_count(), 4);
        assert_eq!(out.filled_count(), 1);
    }

    #[test]
    fn test_seed_fills_leading_gap() {
        let window = ProcessingWindow::new(at(0, 0), at(4, 0)).unwrap();
        let out = run(
            window,
            vec![RawRecord::new("A", "set", at(2, 0), 7.0)],
            vec![("A", seed(at(0, 0) - chrono::Duration::minutes(3), 3.0))],
            vec![],
        );

        let a = values(&out, "A");
        assert_eq!(a.len(), 3);
        assert_eq!(a[0], (at(0, 0), 3.0, PointKind::Filled));
        assert_eq!(out.points[0].sensor_set_id, "seed-set");
        assert_eq!(a[2], (at(2, 0), 7.0, PointKind::Real));
    }

    #[test]
    fn test_seed_without_evidence_emits_nothing() {
        let window = ProcessingWindow::new(at(0, 0), at(4, 0)).unwrap();
        let out = run(window, vec![], vec![("A", seed(at(0, 0), 3.0))], vec![]);

        assert!(out.points.is_empty());
        assert_eq!(out.boundaries[0].effective, None);
    }

    #[test]
    fn test_lookahead_extends_to_window_edge() {
        let window = ProcessingWindow::new(at(0, 0), at(4, 0)).unwrap();
        let out = run(
            window,
            vec![RawRecord::new("A", "set", at(1, 0), 5.0)],
            vec![("B", seed(at(0, 0) - chrono::Duration::minutes(1), 2.0))],
            vec!["A", "B"],
        );

        assert_eq!(values(&out, "A").len(), 3);
        assert_eq!(values(&out, "A")[2], (at(3, 0), 5.0, PointKind::Filled));
        assert_eq!(values(&out, "B").len(), 4);
        assert_eq!(out.boundaries[0].last_real, Some(at(1, 0)));
        assert_eq!(out.boundaries[0].effective, Some(at(3, 0)));
    }

    #[test]
    fn test_lookahead_without_any_value_emits_nothing() {
        // A sensor known only from the future has nothing to carry.
        let window = ProcessingWindow::new(at(0, 0), at(4, 0)).unwrap();
        let out = run(
            window,
            vec![RawRecord::new("B", "set", at(0, 0), 1.0)],
            vec![],
            vec!["A"],
        );
        assert!(values(&out, "A").is_empty());
    }

    #[test]
    fn test_leading_empty_cells_without_seed_stay_empty() {
        let window = ProcessingWindow::new(at(0, 0), at(4, 0)).unwrap();
        let out = run(
            window,
            vec![RawRecord::new("A", "set", at(2, 0), 7.0)],
            vec![],
            vec![],
        );
        assert_eq!(values(&out, "A"), vec![(at(2, 0), 7.0, PointKind::Real)]);
    }
}
