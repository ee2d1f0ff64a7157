//! Sunlight downsampling engine.
//!
//! Turns irregular per-sensor light readings into a regular one-row-per-minute
//! series. Each run picks a bounded window starting at the newest minute
//! already downsampled, aggregates raw readings per (sensor, minute), fills
//! gaps by carrying the last observation forward, and upserts the result.
//!
//! Runs are idempotent and self-resuming: the downsampled table itself is the
//! checkpoint.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod fill;
pub mod ingest;
pub mod job;
pub mod lock;
pub mod merge;
pub mod scaffold;
pub mod state;
pub mod store;
pub mod time;
pub mod types;
pub mod window;

pub use aggregate::{AggregatedWindow, MinuteAggregate, MinuteAggregator};
pub use config::{AggregationPolicy, ConfigError, DownsampleConfig, SunlightConfig};
pub use error::{DownsampleError, Result, StoreError};
pub use fill::{fill_gaps, FillOutput, FilledPoint, PointKind, SensorBoundary};
pub use ingest::{parse_payload, ParsedPayload, PayloadError};
pub use job::{DownsampleJob, RunReport};
pub use lock::{LockError, RunLock};
pub use merge::{MergeOutcome, MergePlan, MergeWriter};
pub use scaffold::{Cell, Scaffold};
pub use state::{load_sensor_state, LoadedState, SensorState};
pub use store::{
    DownsampledStore, DuckDbWarehouse, MemoryWarehouse, RawReadingSink, RawReadingStore,
    TimeBounds, WarehouseSummary,
};
pub use time::truncate_to_minute;
pub use types::{DownsampledPoint, RawReading, RawRecord};
pub use window::{IdleReason, ProcessingWindow, WindowPlan, WindowPlanner};
