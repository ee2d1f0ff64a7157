//! The (minute × sensor) grid for one window.

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::AggregatedWindow;
use crate::state::SensorState;
use crate::window::ProcessingWindow;

/// One grid cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// No value yet, or no value allowed.
    Empty,
    /// Backed by readings in this minute.
    Real { value: f64, sensor_set_id: String },
    /// Carried forward from an earlier cell or seed.
    Filled { value: f64, sensor_set_id: String },
}

impl Cell {
    pub fn value(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Real { value, .. } | Cell::Filled { value, .. } => Some(*value),
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Cell::Real { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// One sensor's cells, indexed by minute offset from the window start.
#[derive(Debug, Clone)]
pub struct SensorRow {
    pub sensor_id: String,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone)]
pub struct Scaffold {
    window: ProcessingWindow,
    rows: Vec<SensorRow>,
}

impl Scaffold {
    /// Lay out every minute of the window for every sensor that has an
    /// aggregate in the window or a seed from before it.
    pub fn build(
        window: ProcessingWindow,
        aggregated: &AggregatedWindow,
        seeds: &BTreeMap<String, SensorState>,
    ) -> Self {
        let minutes = window.minute_count();
        let sensors: BTreeSet<&String> = aggregated.by_sensor.keys().chain(seeds.keys()).collect();

        let rows = sensors
            .into_iter()
            .map(|sensor_id| {
                let mut cells = vec![Cell::Empty; minutes];
                for aggregate in aggregated.sensor(sensor_id) {
                    if let Some(idx) = window.index_of(aggregate.observation_minute) {
                        cells[idx] = Cell::Real {
                            value: aggregate.value,
                            sensor_set_id: aggregate.sensor_set_id.clone(),
                        };
                    }
                }
                SensorRow {
                    sensor_id: sensor_id.clone(),
                    cells,
                }
            })
            .collect();

        Self { window, rows }
    }

    pub fn window(&self) -> &ProcessingWindow {
        &self.window
    }

    pub fn rows(&self) -> &[SensorRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [SensorRow] {
        &mut self.rows
    }

    pub fn sensor_count(&self) -> usize {
        self.rows.len()
    }

    pub fn cell_count(&self) -> usize {
        self.rows.len() * self.window.minute_count()
    }

    pub fn real_count(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.cells.iter())
            .filter(|cell| cell.is_real())
            .count()
    }
}
