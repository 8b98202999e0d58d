//! Telemetry for queues and their device threads.
//!
//! Counters are always collected; exporters need the `telemetry` feature.

pub mod metrics;

#[cfg(feature = "telemetry")]
pub mod export;

pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(feature = "telemetry")]
pub use export::{ConsoleExporter, JsonExporter, MetricsExporter};
