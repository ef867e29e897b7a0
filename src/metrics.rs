use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-partition runtime gauges.
///
/// Read/write samples accumulate into a window that the metrics tick folds
/// into a smoothed latency gauge; everything is plain atomics so the hot
/// paths never take a lock.
#[derive(Debug, Default)]
pub struct PartitionMetrics {
    write_window_us: AtomicU64,
    write_window_ops: AtomicU64,
    read_window_us: AtomicU64,
    read_window_ops: AtomicU64,
    write_latency_us: AtomicU64,
    read_latency_us: AtomicU64,
    repair_failures: AtomicU64,
}

impl PartitionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, elapsed: Duration) {
        self.write_window_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.write_window_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, elapsed: Duration) {
        self.read_window_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.read_window_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds the accumulated window into the latency gauges.
    pub fn recompute_latency(&self) {
        fold(
            &self.write_window_us,
            &self.write_window_ops,
            &self.write_latency_us,
        );
        fold(
            &self.read_window_us,
            &self.read_window_ops,
            &self.read_latency_us,
        );
    }

    pub fn write_latency_us(&self) -> u64 {
        self.write_latency_us.load(Ordering::Relaxed)
    }

    pub fn read_latency_us(&self) -> u64 {
        self.read_latency_us.load(Ordering::Relaxed)
    }

    pub fn note_repair_failure(&self) {
        self.repair_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count of swallowed per-extent repair failures since startup.
    pub fn repair_failures(&self) -> u64 {
        self.repair_failures.load(Ordering::Relaxed)
    }
}

fn fold(window_us: &AtomicU64, window_ops: &AtomicU64, gauge: &AtomicU64) {
    let ops = window_ops.swap(0, Ordering::Relaxed);
    let total = window_us.swap(0, Ordering::Relaxed);
    if ops == 0 {
        return;
    }
    let average = total / ops;
    let previous = gauge.load(Ordering::Relaxed);
    let smoothed = if previous == 0 {
        average
    } else {
        (previous + average) / 2
    };
    gauge.store(smoothed, Ordering::Relaxed);
}
