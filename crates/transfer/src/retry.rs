//! Retry budget and backoff delays for transient failures.

use std::time::Duration;

const MAX_DELAY: Duration = Duration::from_secs(15);

/// Fixed ascending wait schedule; one slot per attempt.
///
/// The first slot is the initial try, so a five-slot schedule means one try
/// plus four retries before giving up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        }
    }
}

impl BackoffSchedule {
    /// Uses `delays` as the per-attempt waits. An empty list falls back to
    /// the default schedule.
    pub fn new(delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            Self::default()
        } else {
            Self { delays }
        }
    }

    /// Derives a schedule with `attempts` slots: an immediate first try,
    /// then doubling from 500 ms, capped at 15 seconds. Zero falls back to
    /// the default schedule.
    pub fn with_max_retries(attempts: u32) -> Self {
        if attempts == 0 {
            return Self::default();
        }
        let mut delays = Vec::with_capacity(attempts as usize);
        delays.push(Duration::ZERO);
        let mut next = Duration::from_millis(500);
        for _ in 1..attempts {
            delays.push(next);
            next = (next * 2).min(MAX_DELAY);
        }
        Self { delays }
    }

    /// Number of attempts the schedule allows, counting the first try.
    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32
    }

    /// Wait before the 1-based `attempt`, or `None` past the budget.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }
        self.delays.get(attempt as usize - 1).copied()
    }
}

/// Attempt counter for one operation against the server.
///
/// The engine creates a fresh state per chunk, so earlier failures never eat
/// into a later chunk's budget.
#[derive(Debug)]
pub struct RetryState {
    schedule: BackoffSchedule,
    attempts_used: u32,
}

impl RetryState {
    pub fn new(schedule: &BackoffSchedule) -> Self {
        Self {
            schedule: schedule.clone(),
            attempts_used: 0,
        }
    }

    /// Consumes one attempt slot, returning its 1-based number and the wait
    /// that precedes it. `None` once the budget is exhausted.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        let attempt = self.attempts_used + 1;
        let delay = self.schedule.delay_for_attempt(attempt)?;
        self.attempts_used = attempt;
        Some((attempt, delay))
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }
}
