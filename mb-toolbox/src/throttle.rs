//! Per-consumer message rate limiting.
//!
//! The window is keyed on the wall-clock second-of-minute (0-59), so two ticks
//! exactly a minute apart look like the same second. This is a known
//! limitation kept for parity with existing consumers.

use std::time::Duration;

use chrono::{Timelike, Utc};
use tokio::time::sleep;
use tracing::warn;

/// How long the consumer stops when the rate is exceeded.
pub const THROTTLE_PAUSE: Duration = Duration::from_secs(5);

/// Counts messages per wall-clock second and pauses the caller when a
/// ceiling is exceeded.
pub struct Throttle {
    message_count: u32,
    second_stamp: u32,
    pause: Duration,
    clock: fn() -> u32,
}

impl Throttle {
    pub fn new() -> Self {
        Self::with_clock(wall_clock_second, THROTTLE_PAUSE)
    }

    /// Build a throttle reading the second-of-minute from `clock`.
    pub fn with_clock(clock: fn() -> u32, pause: Duration) -> Self {
        Self {
            message_count: 0,
            second_stamp: clock(),
            pause,
            clock,
        }
    }

    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    /// Record one message at `second`, returning whether the caller must pause.
    ///
    /// The count is incremented before the second check, so the first message
    /// of a new second leaves the count at 0.
    pub fn observe(&mut self, second: u32, max_per_second: u32) -> bool {
        self.message_count += 1;

        if self.second_stamp != second {
            self.second_stamp = second;
            self.message_count = 0;
        }

        self.message_count > max_per_second
    }

    /// Record one message, sleeping for the pause when the rate is exceeded.
    pub async fn tick(&mut self, max_per_second: u32) {
        let second = (self.clock)();
        if !self.observe(second, max_per_second) {
            return;
        }

        warn!(
            message_rate = self.message_count,
            max_message_rate = max_per_second,
            pause_seconds = self.pause.as_secs_f64(),
            "consumer_throttle_activated"
        );

        sleep(self.pause).await;
        self.message_count = 0;
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

fn wall_clock_second() -> u32 {
    Utc::now().second()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn fixed_second() -> u32 {
        7
    }

    #[test]
    fn test_observe_within_ceiling() {
        let mut throttle = Throttle::with_clock(fixed_second, THROTTLE_PAUSE);

        let paused: Vec<bool> = (0..3).map(|_| throttle.observe(7, 3)).collect();

        assert_eq!(paused, vec![false, false, false]);
        assert_eq!(throttle.message_count(), 3);
    }

    #[test]
    fn test_observe_exceeds_ceiling_on_fourth() {
        let mut throttle = Throttle::with_clock(fixed_second, THROTTLE_PAUSE);

        let paused: Vec<bool> = (0..4).map(|_| throttle.observe(7, 3)).collect();

        assert_eq!(paused, vec![false, false, false, true]);
    }

    #[test]
    fn test_new_second_resets_count() {
        let mut throttle = Throttle::with_clock(fixed_second, THROTTLE_PAUSE);
        throttle.observe(7, 3);
        throttle.observe(7, 3);

        assert!(!throttle.observe(8, 3));
        assert_eq!(throttle.message_count(), 0);
    }

    #[test]
    fn test_minute_rollover_aliases_same_second() {
        let mut throttle = Throttle::with_clock(fixed_second, THROTTLE_PAUSE);
        throttle.observe(7, 1);

        // Sixty seconds later the stamp still reads 7, so the count carries on
        assert!(throttle.observe(7, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_pauses_once_and_resets() {
        let mut throttle = Throttle::with_clock(fixed_second, THROTTLE_PAUSE);
        let start = Instant::now();

        for _ in 0..3 {
            throttle.tick(3).await;
        }
        assert!(start.elapsed() < THROTTLE_PAUSE);

        throttle.tick(3).await;
        assert!(start.elapsed() >= THROTTLE_PAUSE);
        assert!(start.elapsed() < THROTTLE_PAUSE * 2);
        assert_eq!(throttle.message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_under_ceiling_never_pauses() {
        let mut throttle = Throttle::with_clock(fixed_second, THROTTLE_PAUSE);
        let start = Instant::now();

        for _ in 0..3 {
            throttle.tick(3).await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
