//! Device-side counters and kernel latency tracking.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by a queue, its device thread and its buffers.
#[derive(Debug)]
pub struct Metrics {
    // Task counters
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,

    // Kernel execution
    kernels_executed: AtomicU64,
    work_items_executed: AtomicU64,
    busy_time_ns: AtomicU64,
    latency_histogram: RwLock<Histogram<u64>>,

    // Transfers
    bytes_to_device: AtomicU64,
    bytes_from_device: AtomicU64,

    // Memory
    buffers_allocated: AtomicU64,
    live_buffer_bytes: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, max one hour in nanoseconds
        let histogram =
            Histogram::new_with_max(3_600_000_000_000, 3).expect("Failed to create histogram");

        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            kernels_executed: AtomicU64::new(0),
            work_items_executed: AtomicU64::new(0),
            busy_time_ns: AtomicU64::new(0),
            latency_histogram: RwLock::new(histogram),
            bytes_to_device: AtomicU64::new(0),
            bytes_from_device: AtomicU64::new(0),
            buffers_allocated: AtomicU64::new(0),
            live_buffer_bytes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one NDRange execution.
    pub fn record_kernel(&self, work_items: u64, duration: Duration) {
        let ns = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.kernels_executed.fetch_add(1, Ordering::Relaxed);
        self.work_items_executed.fetch_add(work_items, Ordering::Relaxed);
        self.busy_time_ns.fetch_add(ns, Ordering::Relaxed);

        if let Some(mut hist) = self.latency_histogram.try_write() {
            let _ = hist.record(ns);
        }
    }

    pub fn record_upload(&self, bytes: usize) {
        self.bytes_to_device.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_download(&self, bytes: usize) {
        self.bytes_from_device.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_allocation(&self, bytes: usize) {
        self.buffers_allocated.fetch_add(1, Ordering::Relaxed);
        self.live_buffer_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_release(&self, bytes: usize) {
        self.live_buffer_bytes.fetch_sub(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.latency_histogram.read();

        MetricsSnapshot {
            timestamp: Instant::now(),
            uptime: self.start_time.elapsed(),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            kernels_executed: self.kernels_executed.load(Ordering::Relaxed),
            work_items_executed: self.work_items_executed.load(Ordering::Relaxed),
            busy_time_ns: self.busy_time_ns.load(Ordering::Relaxed),
            avg_latency_ns: if histogram.len() > 0 {
                histogram.mean() as u64
            } else {
                0
            },
            p50_latency_ns: histogram.value_at_quantile(0.50),
            p99_latency_ns: histogram.value_at_quantile(0.99),
            max_latency_ns: histogram.max(),
            bytes_to_device: self.bytes_to_device.load(Ordering::Relaxed),
            bytes_from_device: self.bytes_from_device.load(Ordering::Relaxed),
            buffers_allocated: self.buffers_allocated.load(Ordering::Relaxed),
            live_buffer_bytes: self.live_buffer_bytes.load(Ordering::Relaxed),
        }
    }

    /// Reset counters. The live buffer gauge is left alone since it tracks
    /// memory that is still allocated.
    pub fn reset(&self) {
        self.tasks_submitted.store(0, Ordering::Relaxed);
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.kernels_executed.store(0, Ordering::Relaxed);
        self.work_items_executed.store(0, Ordering::Relaxed);
        self.busy_time_ns.store(0, Ordering::Relaxed);
        self.bytes_to_device.store(0, Ordering::Relaxed);
        self.bytes_from_device.store(0, Ordering::Relaxed);
        self.buffers_allocated.store(0, Ordering::Relaxed);

        if let Some(mut hist) = self.latency_histogram.try_write() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub uptime: Duration,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub kernels_executed: u64,
    pub work_items_executed: u64,
    pub busy_time_ns: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
    pub bytes_to_device: u64,
    pub bytes_from_device: u64,
    pub buffers_allocated: u64,
    pub live_buffer_bytes: u64,
}

impl MetricsSnapshot {
    /// Fraction of uptime the device thread spent running kernels.
    pub fn utilization(&self) -> f64 {
        let uptime_ns = self.uptime.as_nanos() as f64;
        if uptime_ns == 0.0 {
            return 0.0;
        }
        (self.busy_time_ns as f64 / uptime_ns).min(1.0)
    }

    pub fn kernels_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.kernels_executed as f64 / seconds
    }

    /// Tasks submitted but not yet completed or failed.
    pub fn tasks_in_flight(&self) -> u64 {
        self.tasks_submitted
            .saturating_sub(self.tasks_completed + self.tasks_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_basic() {
        let metrics = Metrics::new();

        metrics.record_task_submitted();
        metrics.record_task_submitted();
        metrics.record_kernel(64, Duration::from_micros(3));
        metrics.record_task_completed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_submitted, 2);
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_in_flight(), 1);
        assert_eq!(snapshot.kernels_executed, 1);
        assert_eq!(snapshot.work_items_executed, 64);
        assert!(snapshot.avg_latency_ns > 0);
    }

    #[test]
    fn test_live_buffer_gauge() {
        let metrics = Metrics::new();

        metrics.record_allocation(128);
        metrics.record_allocation(64);
        metrics.record_release(128);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.buffers_allocated, 2);
        assert_eq!(snapshot.live_buffer_bytes, 64);
    }

    #[test]
    fn test_metrics_reset_keeps_live_bytes() {
        let metrics = Metrics::new();

        metrics.record_allocation(32);
        metrics.record_upload(32);
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_to_device, 0);
        assert_eq!(snapshot.buffers_allocated, 0);
        assert_eq!(snapshot.live_buffer_bytes, 32);
    }
}
