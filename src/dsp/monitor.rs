//! Producer performance counters.
//!
//! Compute time is measured per buffer, excluding the blocking sink write,
//! and compared against the buffer's playback duration. All counters are
//! atomics so the control plane can read them without touching the
//! parameter lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

/// Emit at most one overrun warning per this many buffers (~3 s at 22.05 kHz).
const WARN_INTERVAL_BUFFERS: u64 = 256;

#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    buffers: AtomicU64,
    missed_locks: AtomicU64,
    overruns: AtomicU64,
    last_work_us: AtomicU64,
    peak_work_us: AtomicU64,
    total_work_us: AtomicU64,
    budget_us: AtomicU64,
    last_warned_at: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub buffers: u64,
    pub missed_locks: u64,
    pub overruns: u64,
    pub last_work_us: u64,
    pub peak_work_us: u64,
    pub average_work_us: u64,
    pub budget_us: u64,
    /// Average compute time as a percentage of the buffer duration.
    pub load_percent: f32,
}

impl PerformanceMonitor {
    pub fn new(buffer_duration: Duration) -> Self {
        let monitor = Self::default();
        monitor.set_budget(buffer_duration);
        monitor
    }

    pub fn set_budget(&self, buffer_duration: Duration) {
        self.budget_us
            .store(buffer_duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record one rendered buffer. `synced` is false when the parameter lock
    /// was busy and stale values were used.
    pub fn record(&self, work: Duration, synced: bool) {
        let work_us = work.as_micros() as u64;
        let buffer = self.buffers.fetch_add(1, Ordering::Relaxed) + 1;
        if !synced {
            self.missed_locks.fetch_add(1, Ordering::Relaxed);
        }
        self.last_work_us.store(work_us, Ordering::Relaxed);
        self.peak_work_us.fetch_max(work_us, Ordering::Relaxed);
        self.total_work_us.fetch_add(work_us, Ordering::Relaxed);

        let budget = self.budget_us.load(Ordering::Relaxed);
        if budget > 0 && work_us > budget {
            let overruns = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            let last = self.last_warned_at.load(Ordering::Relaxed);
            if last == 0 || buffer - last >= WARN_INTERVAL_BUFFERS {
                self.last_warned_at.store(buffer, Ordering::Relaxed);
                warn!(
                    "audio buffer took {work_us} us, budget {budget} us ({overruns} overruns so far)"
                );
            }
        }
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let buffers = self.buffers.load(Ordering::Relaxed);
        let total = self.total_work_us.load(Ordering::Relaxed);
        let budget_us = self.budget_us.load(Ordering::Relaxed);
        let average_work_us = if buffers == 0 { 0 } else { total / buffers };
        let load_percent = if budget_us == 0 {
            0.0
        } else {
            average_work_us as f32 * 100.0 / budget_us as f32
        };

        PerformanceSnapshot {
            buffers,
            missed_locks: self.missed_locks.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            last_work_us: self.last_work_us.load(Ordering::Relaxed),
            peak_work_us: self.peak_work_us.load(Ordering::Relaxed),
            average_work_us,
            budget_us,
            load_percent,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.buffers,
            &self.missed_locks,
            &self.overruns,
            &self.last_work_us,
            &self.peak_work_us,
            &self.total_work_us,
            &self.last_warned_at,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_buffers_and_missed_locks() {
        let monitor = PerformanceMonitor::new(Duration::from_millis(10));
        monitor.record(Duration::from_micros(1_000), true);
        monitor.record(Duration::from_micros(3_000), false);

        let snap = monitor.snapshot();
        assert_eq!(snap.buffers, 2);
        assert_eq!(snap.missed_locks, 1);
        assert_eq!(snap.last_work_us, 3_000);
        assert_eq!(snap.peak_work_us, 3_000);
        assert_eq!(snap.average_work_us, 2_000);
        assert_eq!(snap.budget_us, 10_000);
        assert!((snap.load_percent - 20.0).abs() < 1e-3);
        assert_eq!(snap.overruns, 0);
    }

    #[test]
    fn overruns_are_counted_past_the_budget() {
        let monitor = PerformanceMonitor::new(Duration::from_millis(1));
        for _ in 0..5 {
            monitor.record(Duration::from_millis(2), true);
        }
        monitor.record(Duration::from_micros(500), true);
        assert_eq!(monitor.snapshot().overruns, 5);
    }

    #[test]
    fn reset_zeroes_counters_but_keeps_budget() {
        let monitor = PerformanceMonitor::new(Duration::from_millis(5));
        monitor.record(Duration::from_millis(6), false);
        monitor.reset();
        let snap = monitor.snapshot();
        assert_eq!(snap.buffers, 0);
        assert_eq!(snap.peak_work_us, 0);
        assert_eq!(snap.budget_us, 5_000);
    }

    #[test]
    fn snapshot_serializes() {
        let monitor = PerformanceMonitor::new(Duration::from_millis(5));
        let json = serde_json::to_value(monitor.snapshot()).unwrap();
        assert_eq!(json["budget_us"], 5_000);
    }
}
