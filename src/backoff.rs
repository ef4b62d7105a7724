//! # Retry Backoff Timer
//!
//! This module provides the exponential-with-cap retry timer shared by every
//! state machine in the crate. A state machine arms the timer when it enters a
//! retrying state, calls [`Backoff::retry`] on each attempt, and polls
//! [`Backoff::is_expired`] on subsequent ticks to decide whether the next
//! attempt is due.
//!
//! The delay for attempt `n` is `min(base * 2^n, max)`. The retry count is
//! only ever reset through [`Backoff::begin`] or [`Backoff::rearm`];
//! [`Backoff::reconfigure`] changes the delay policy mid-sequence while
//! keeping the count, which is how a state machine switches from one retry
//! cadence to another without forgetting how long it has been trying.

use embassy_time::{Duration, Instant};

/// Exponential retry timer over the monotonic clock.
///
/// All deadline math takes the current [`Instant`] as an explicit argument so
/// state machines stay deterministic under test.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    delay: Duration,
    deadline: Instant,
    retry_count: u32,
}

impl Backoff {
    /// Creates an idle timer with the given policy.
    ///
    /// The retry count is zero and the deadline is treated as already
    /// expired, so the first attempt is never delayed.
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            delay: base,
            deadline: Instant::from_ticks(0),
            retry_count: 0,
        }
    }

    /// Resets the retry count to zero and arms the deadline at `base`.
    pub fn begin(&mut self, now: Instant, base: Duration, max: Duration) {
        self.rearm(base, max);
        self.reload(now);
    }

    /// Resets the retry count and policy without touching the clock.
    ///
    /// The deadline is left in the expired position, so the next tick
    /// proceeds immediately. This is the variant message handlers use: they
    /// are restricted to plain field assignment and do not carry a clock.
    pub fn rearm(&mut self, base: Duration, max: Duration) {
        self.retry_count = 0;
        self.base = base;
        self.max = max;
        self.delay = base;
        self.deadline = Instant::from_ticks(0);
    }

    /// Changes the delay policy while keeping the retry count.
    ///
    /// Used when the failure class changes mid-sequence, e.g. from the
    /// subscribe cadence to the much more patient attach cadence.
    pub fn reconfigure(&mut self, now: Instant, base: Duration, max: Duration) -> Duration {
        self.base = base;
        self.max = max;
        self.reload(now)
    }

    /// Records one more attempt and arms the next deadline.
    ///
    /// Returns the delay until that deadline.
    pub fn retry(&mut self, now: Instant) -> Duration {
        self.retry_count = self.retry_count.saturating_add(1);
        self.reload(now)
    }

    /// Resets the retry count, keeping policy and deadline.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    /// Whether at least one retry has happened since the last (re)arm.
    pub fn is_retry(&self) -> bool {
        self.retry_count > 0
    }

    /// Whether the current deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.deadline
    }

    /// Number of retries since the last (re)arm.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// The delay armed by the most recent reload.
    pub fn wait_time(&self) -> Duration {
        self.delay
    }

    fn reload(&mut self, now: Instant) -> Duration {
        let factor = 1u64.checked_shl(self.retry_count).unwrap_or(u64::MAX);
        let millis = self.base.as_millis().saturating_mul(factor);
        self.delay = Duration::from_millis(millis.min(self.max.as_millis()));
        self.deadline = now + self.delay;
        self.delay
    }
}
