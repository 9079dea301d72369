use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters updated by the acquisition thread and read by the reporter.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    batches: AtomicU64,
    samples: AtomicU64,
    idle_polls: AtomicU64,
    timeouts: AtomicU64,
    overflows: AtomicU64,
    gap_samples: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub batches: u64,
    /// Per channel
    pub samples: u64,
    pub idle_polls: u64,
    pub timeouts: u64,
    pub overflows: u64,
    pub gap_samples: u64,
}

/// What changed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalReport {
    pub samples_per_sec: f64,
    pub overflows: u64,
    pub gap_samples: u64,
}

impl StatsSnapshot {
    /// Compares against a snapshot taken `elapsed` earlier.
    pub fn since(&self, earlier: &StatsSnapshot, elapsed: Duration) -> IntervalReport {
        let secs = elapsed.as_secs_f64();
        let samples_per_sec = if secs > 0.0 {
            self.samples.saturating_sub(earlier.samples) as f64 / secs
        } else {
            0.0
        };
        IntervalReport {
            samples_per_sec,
            overflows: self.overflows.saturating_sub(earlier.overflows),
            gap_samples: self.gap_samples.saturating_sub(earlier.gap_samples),
        }
    }
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, count: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.idle_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap(&self, samples: u64) {
        self.gap_samples.fetch_add(samples, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.batches.load(Ordering::Acquire),
            samples: self.samples.load(Ordering::Acquire),
            idle_polls: self.idle_polls.load(Ordering::Acquire),
            timeouts: self.timeouts.load(Ordering::Acquire),
            overflows: self.overflows.load(Ordering::Acquire),
            gap_samples: self.gap_samples.load(Ordering::Acquire),
        }
    }
}

/// Logs throughput and discontinuity counters every `every` until aborted.
pub async fn report_loop(stats: Arc<AcquisitionStats>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    let mut last = stats.snapshot();
    let mut last_at = Instant::now();
    loop {
        ticker.tick().await;
        let current = stats.snapshot();
        let interval = current.since(&last, last_at.elapsed());

        tracing::info!(
            "acquisition: {:.3} Msps per channel, {} samples, {} overflows, {} gap samples",
            interval.samples_per_sec / 1e6,
            current.samples,
            current.overflows,
            current.gap_samples
        );
        if interval.overflows > 0 {
            tracing::warn!(
                "{} overflow(s) since last report, {} samples skipped",
                interval.overflows,
                interval.gap_samples
            );
        }

        last = current;
        last_at = Instant::now();
    }
}
