//! Atomic counters and gauges shared by producers and the writer.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Number of write latency samples kept for percentile derivation.
const LATENCY_WINDOW: usize = 256;

/// Process-scoped telemetry registry.
///
/// Updated lock-free from both sides of the pipeline; the only lock guards
/// the small rolling latency window. Counters live for the process lifetime
/// and are not reset by rotation.
pub(crate) struct WriterTelemetry {
    queue_depth: AtomicU64,
    queue_high_watermark: AtomicU64,
    dropped_lines: AtomicU64,
    batches_written: AtomicU64,
    lines_written: AtomicU64,
    fallback_direct_writes: AtomicU64,
    suppressed_messages: AtomicU64,
    write_failures: AtomicU64,
    latencies: Mutex<LatencyWindow>,
}

impl WriterTelemetry {
    pub fn new() -> Self {
        WriterTelemetry {
            queue_depth: AtomicU64::new(0),
            queue_high_watermark: AtomicU64::new(0),
            dropped_lines: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            lines_written: AtomicU64::new(0),
            fallback_direct_writes: AtomicU64::new(0),
            suppressed_messages: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            latencies: Mutex::new(LatencyWindow::new()),
        }
    }

    pub fn task_enqueued(&self) {
        let depth = self.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        store_max(&self.queue_high_watermark, depth);
    }

    pub fn task_dequeued(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, lines: u64) {
        self.dropped_lines.fetch_add(lines, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallback_direct_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Account one durable write of `lines` lines taking `elapsed`.
    pub fn record_write(&self, lines: u64, elapsed: Duration) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.lines_written.fetch_add(lines, Ordering::Relaxed);
        self.latencies.lock().record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let (p50, p95) = self.latencies.lock().percentiles();
        TelemetrySnapshot {
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            queue_high_watermark: self.queue_high_watermark.load(Ordering::Relaxed),
            dropped_lines: self.dropped_lines.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            lines_written: self.lines_written.load(Ordering::Relaxed),
            fallback_direct_writes: self.fallback_direct_writes.load(Ordering::Relaxed),
            suppressed_messages: self.suppressed_messages.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            write_latency_p50_ms: p50,
            write_latency_p95_ms: p95,
        }
    }
}

/// Monotonic-max update without a lock.
fn store_max(slot: &AtomicU64, value: u64) {
    let mut current = slot.load(Ordering::Relaxed);
    while value > current {
        match slot.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Read-only view of the telemetry registry.
///
/// Latency percentiles are derived from a rolling window of the most recent
/// writes, linearly interpolated between adjacent ranks.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// Write tasks currently queued.
    pub queue_depth: u64,
    /// Maximum observed queue depth (monotonic).
    pub queue_high_watermark: u64,
    /// Lines abandoned under non-forced overload (monotonic).
    pub dropped_lines: u64,
    /// Durable writes performed.
    pub batches_written: u64,
    /// Lines made durable.
    pub lines_written: u64,
    /// Forced writes performed synchronously on a producer thread because
    /// the queue stayed full through the second-chance window.
    pub fallback_direct_writes: u64,
    /// Lines suppressed by duplicate-message rate control.
    pub suppressed_messages: u64,
    /// Writes that failed with an I/O error (the range is skipped, the
    /// writer continues).
    pub write_failures: u64,
    pub write_latency_p50_ms: f64,
    pub write_latency_p95_ms: f64,
}

struct LatencyWindow {
    samples: Vec<f64>,
    next: usize,
}

impl LatencyWindow {
    fn new() -> Self {
        LatencyWindow {
            samples: Vec::with_capacity(LATENCY_WINDOW),
            next: 0,
        }
    }

    fn record(&mut self, millis: f64) {
        if self.samples.len() < LATENCY_WINDOW {
            self.samples.push(millis);
        } else {
            self.samples[self.next] = millis;
            self.next = (self.next + 1) % LATENCY_WINDOW;
        }
    }

    fn percentiles(&self) -> (f64, f64) {
        if self.samples.is_empty() {
            return (0.0, 0.0);
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        (percentile(&sorted, 0.50), percentile(&sorted, 0.95))
    }
}

/// Interpolated percentile over a sorted, non-empty sample set.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (sorted.len() - 1) as f64 * p;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_is_monotonic() {
        let t = WriterTelemetry::new();
        t.task_enqueued();
        t.task_enqueued();
        t.task_dequeued();
        t.task_enqueued();

        let snap = t.snapshot();
        assert_eq!(snap.queue_depth, 2);
        assert_eq!(snap.queue_high_watermark, 2);
    }

    #[test]
    fn write_accounting() {
        let t = WriterTelemetry::new();
        t.record_write(10, Duration::from_millis(2));
        t.record_write(5, Duration::from_millis(4));

        let snap = t.snapshot();
        assert_eq!(snap.batches_written, 2);
        assert_eq!(snap.lines_written, 15);
        assert!(snap.write_latency_p50_ms > 0.0);
        assert!(snap.write_latency_p95_ms >= snap.write_latency_p50_ms);
    }

    #[test]
    fn empty_window_reports_zero_latency() {
        let snap = WriterTelemetry::new().snapshot();
        assert_eq!(snap.write_latency_p50_ms, 0.0);
        assert_eq!(snap.write_latency_p95_ms, 0.0);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [0.0, 10.0];
        assert_eq!(percentile(&sorted, 0.5), 5.0);
        assert_eq!(percentile(&sorted, 0.95), 9.5);
    }

    #[test]
    fn window_wraps_after_capacity() {
        let mut window = LatencyWindow::new();
        for i in 0..(LATENCY_WINDOW + 50) {
            window.record(i as f64);
        }
        assert_eq!(window.samples.len(), LATENCY_WINDOW);
        let (p50, _) = window.percentiles();
        // Oldest 50 samples were overwritten.
        assert!(p50 >= 50.0);
    }
}
