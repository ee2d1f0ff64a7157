//! Row types shared by the stores and the pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw reading exactly as it sits in the warehouse.
///
/// Every column except the timestamp is nullable upstream, so validation
/// happens when the pipeline consumes the row, not when it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub sensor_id: Option<String>,
    pub sensor_set_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub light_intensity: Option<f64>,
}

/// A raw reading that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub sensor_id: String,
    pub sensor_set_id: String,
    pub timestamp: DateTime<Utc>,
    pub light_intensity: f64,
}

/// Why a raw record was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedReason {
    #[error("missing sensor_id")]
    MissingSensorId,

    #[error("missing sensor_set_id for sensor {sensor_id}")]
    MissingSensorSetId { sensor_id: String },

    #[error("missing light_intensity for sensor {sensor_id}")]
    MissingIntensity { sensor_id: String },

    #[error("non-finite light_intensity {value} for sensor {sensor_id}")]
    NonFiniteIntensity { sensor_id: String, value: f64 },
}

impl RawRecord {
    pub fn new(
        sensor_id: impl Into<String>,
        sensor_set_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        light_intensity: f64,
    ) -> Self {
        Self {
            sensor_id: Some(sensor_id.into()),
            sensor_set_id: Some(sensor_set_id.into()),
            timestamp,
            light_intensity: Some(light_intensity),
        }
    }

    pub fn validate(self) -> Result<RawReading, MalformedReason> {
        let sensor_id = non_blank(self.sensor_id).ok_or(MalformedReason::MissingSensorId)?;
        let Some(sensor_set_id) = non_blank(self.sensor_set_id) else {
            return Err(MalformedReason::MissingSensorSetId { sensor_id });
        };
        let Some(value) = self.light_intensity else {
            return Err(MalformedReason::MissingIntensity { sensor_id });
        };
        if !value.is_finite() {
            return Err(MalformedReason::NonFiniteIntensity { sensor_id, value });
        }
        Ok(RawReading {
            sensor_id,
            sensor_set_id,
            timestamp: self.timestamp,
            light_intensity: value,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.clone().validate().is_ok()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// One row of `downsampled_readings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownsampledPoint {
    pub observation_minute: DateTime<Utc>,
    pub sensor_id: String,
    pub sensor_set_id: String,
    pub smoothed_light_intensity: f64,
    pub last_updated: DateTime<Utc>,
}

impl DownsampledPoint {
    pub fn key(&self) -> (DateTime<Utc>, &str) {
        (self.observation_minute, self.sensor_id.as_str())
    }
}
