//! Metrics export in JSON and console formats.

use super::metrics::MetricsSnapshot;
use crate::error::{Error, Result};

pub trait MetricsExporter: Send + Sync {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Writes snapshots as pretty-printed JSON to a file.
#[derive(Debug)]
pub struct JsonExporter {
    output_path: std::path::PathBuf,
}

impl JsonExporter {
    pub fn new(output_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let serializable = SerializableSnapshot::from(snapshot);
        let json = serde_json::to_string_pretty(&serializable)
            .map_err(|e| Error::telemetry(format!("JSON serialization failed: {}", e)))?;

        std::fs::write(&self.output_path, json)
            .map_err(|e| Error::telemetry(format!("Failed to write file: {}", e)))?;

        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
struct SerializableSnapshot {
    uptime_secs: f64,
    tasks_submitted: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    kernels_executed: u64,
    work_items_executed: u64,
    busy_time_ms: u64,
    avg_latency_us: f64,
    p50_latency_us: f64,
    p99_latency_us: f64,
    max_latency_us: f64,
    bytes_to_device: u64,
    bytes_from_device: u64,
    buffers_allocated: u64,
    live_buffer_bytes: u64,
    utilization: f64,
    kernels_per_second: f64,
}

impl From<&MetricsSnapshot> for SerializableSnapshot {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            uptime_secs: snapshot.uptime.as_secs_f64(),
            tasks_submitted: snapshot.tasks_submitted,
            tasks_completed: snapshot.tasks_completed,
            tasks_failed: snapshot.tasks_failed,
            kernels_executed: snapshot.kernels_executed,
            work_items_executed: snapshot.work_items_executed,
            busy_time_ms: snapshot.busy_time_ns / 1_000_000,
            avg_latency_us: snapshot.avg_latency_ns as f64 / 1_000.0,
            p50_latency_us: snapshot.p50_latency_ns as f64 / 1_000.0,
            p99_latency_us: snapshot.p99_latency_ns as f64 / 1_000.0,
            max_latency_us: snapshot.max_latency_ns as f64 / 1_000.0,
            bytes_to_device: snapshot.bytes_to_device,
            bytes_from_device: snapshot.bytes_from_device,
            buffers_allocated: snapshot.buffers_allocated,
            live_buffer_bytes: snapshot.live_buffer_bytes,
            utilization: snapshot.utilization(),
            kernels_per_second: snapshot.kernels_per_second(),
        }
    }
}

/// Prints snapshots to stdout.
#[derive(Debug)]
pub struct ConsoleExporter {
    verbose: bool,
}

impl ConsoleExporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MetricsExporter for ConsoleExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        println!("=== ndqueue metrics ===");
        println!("Uptime: {:.2}s", snapshot.uptime.as_secs_f64());
        println!("Tasks submitted: {}", snapshot.tasks_submitted);
        println!("Tasks completed: {}", snapshot.tasks_completed);
        println!("Tasks failed: {}", snapshot.tasks_failed);
        println!("Kernels executed: {}", snapshot.kernels_executed);
        println!("Utilization: {:.1}%", snapshot.utilization() * 100.0);

        if self.verbose {
            println!("\nKernel latency:");
            println!("  Average: {:.2}μs", snapshot.avg_latency_ns as f64 / 1_000.0);
            println!("  P50: {:.2}μs", snapshot.p50_latency_ns as f64 / 1_000.0);
            println!("  P99: {:.2}μs", snapshot.p99_latency_ns as f64 / 1_000.0);
            println!("  Max: {:.2}μs", snapshot.max_latency_ns as f64 / 1_000.0);

            println!("\nTransfers:");
            println!("  Host -> device: {} bytes", snapshot.bytes_to_device);
            println!("  Device -> host: {} bytes", snapshot.bytes_from_device);
            println!("  Live buffers: {} bytes", snapshot.live_buffer_bytes);
        }

        println!("=======================");

        Ok(())
    }
}

impl Default for ConsoleExporter {
    fn default() -> Self {
        Self::new(false)
    }
}
