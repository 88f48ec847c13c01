// src/updater/metrics.rs

//! Download speed and remaining-time estimation from progress samples.

use serde::Serialize;
use tokio::time::Instant;

/// Derived download metrics shown next to a progress bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DownloadMetrics {
    pub speed_bytes_per_second: Option<f64>,
    pub eta_seconds: Option<f64>,
}

/// A progress observation tagged with the instant it was received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub at: Instant,
}

/// Keeps the previous sample around so each new one can be turned into an
/// instantaneous throughput figure.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<ProgressSample>,
    metrics: DownloadMetrics,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> DownloadMetrics {
        self.metrics
    }

    /// Forget the previous attempt entirely.
    pub fn reset(&mut self) {
        self.last = None;
        self.metrics = DownloadMetrics::default();
    }

    /// Feed a new sample and return the metrics after it.
    ///
    /// The first sample only primes the tracker. A sample that arrives with
    /// no elapsed time keeps the previous metrics instead of dividing by zero.
    pub fn record(&mut self, sample: ProgressSample) -> DownloadMetrics {
        if let Some(prev) = self.last {
            let elapsed = sample.at.saturating_duration_since(prev.at).as_secs_f64();
            if elapsed > 0.0 {
                let delta = sample.downloaded_bytes.saturating_sub(prev.downloaded_bytes);
                let speed = delta as f64 / elapsed;
                let eta = match sample.total_bytes {
                    Some(total) if speed > 0.0 => {
                        Some(total.saturating_sub(sample.downloaded_bytes) as f64 / speed)
                    }
                    _ => None,
                };
                self.metrics = DownloadMetrics {
                    speed_bytes_per_second: Some(speed),
                    eta_seconds: eta,
                };
            }
        }
        self.last = Some(sample);
        self.metrics
    }
}
