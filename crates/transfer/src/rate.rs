//! Throughput estimation from progress samples.

use std::time::Instant;

/// Upload speed and projected time remaining.
///
/// Zeros mean the estimate is not yet known; consumers render that as "--"
/// rather than a real rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimate {
    /// Bytes per second over the last measurement window.
    pub speed: f64,
    /// Seconds until the remaining bytes land, at the current speed.
    pub remaining_seconds: f64,
}

impl RateEstimate {
    pub const UNKNOWN: Self = Self {
        speed: 0.0,
        remaining_seconds: 0.0,
    };
}

/// Two-sample estimator: each recorded sample is measured against the
/// previous one and then becomes the start of the next window.
#[derive(Debug, Default)]
pub struct RateEstimator {
    window_start: Option<(Instant, u64)>,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a progress sample and returns the estimate for the window it
    /// closes. Returns [`RateEstimate::UNKNOWN`] for the first sample after
    /// construction or a [`reset`](Self::reset), and whenever the window has
    /// zero duration or no byte growth.
    pub fn record(&mut self, at: Instant, bytes_uploaded: u64, total: u64) -> RateEstimate {
        let Some((start_at, start_bytes)) = self.window_start.replace((at, bytes_uploaded)) else {
            return RateEstimate::UNKNOWN;
        };
        let secs = at.saturating_duration_since(start_at).as_secs_f64();
        if secs <= 0.0 || bytes_uploaded <= start_bytes {
            return RateEstimate::UNKNOWN;
        }
        let speed = (bytes_uploaded - start_bytes) as f64 / secs;
        RateEstimate {
            speed,
            remaining_seconds: total.saturating_sub(bytes_uploaded) as f64 / speed,
        }
    }

    /// Discards the open window. Called after a reconcile so stale samples
    /// never mix with the post-resume position.
    pub fn reset(&mut self) {
        self.window_start = None;
    }
}
