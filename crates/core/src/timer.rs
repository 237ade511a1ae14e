//! Frame clock.

use std::time::{Duration, Instant};

/// Measures frame deltas, total run time and the frame rate over a window.
///
/// Owned by whoever drives the frame loop and passed explicitly; there is no
/// process-wide timer instance.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    last_delta: Duration,
    ticks: u64,
    window_start: Instant,
    window_ticks: u64,
}

impl Timer {
    /// Starts a clock at the current instant.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            last_delta: Duration::ZERO,
            ticks: 0,
            window_start: now,
            window_ticks: 0,
        }
    }

    /// Time since the clock started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// [`Timer::elapsed`] in seconds.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Marks the start of a frame and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        self.last_delta = now - self.last_tick;
        self.last_tick = now;
        self.ticks += 1;
        self.window_ticks += 1;
        self.last_delta
    }

    /// [`Timer::tick`] in seconds.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Delta measured by the most recent tick.
    pub fn last_delta(&self) -> Duration {
        self.last_delta
    }

    /// Ticks since the clock started.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks per second since the last call, once at least `interval` passed.
    ///
    /// Returns `None` while the window is shorter than `interval`; otherwise
    /// returns the rate and starts a new window.
    pub fn take_rate(&mut self, interval: Duration) -> Option<f64> {
        let window = self.window_start.elapsed();
        if window < interval || window.is_zero() {
            return None;
        }
        let rate = self.window_ticks as f64 / window.as_secs_f64();
        self.window_start = Instant::now();
        self.window_ticks = 0;
        Some(rate)
    }

    /// Restarts the clock.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_records_last_delta() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        let delta = timer.tick();
        assert_eq!(timer.last_delta(), delta);
        assert!(delta >= Duration::from_millis(2));
        assert_eq!(timer.ticks(), 1);
    }

    #[test]
    fn test_rate_window() {
        let mut timer = Timer::new();
        assert_eq!(timer.take_rate(Duration::from_secs(60)), None);

        for _ in 0..4 {
            timer.tick();
        }
        std::thread::sleep(Duration::from_millis(5));
        let rate = timer.take_rate(Duration::from_millis(1)).unwrap();
        assert!(rate > 0.0);

        // New window, no ticks yet.
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(timer.take_rate(Duration::from_millis(1)), Some(0.0));
    }

    #[test]
    fn test_reset() {
        let mut timer = Timer::new();
        timer.tick();
        timer.reset();
        assert_eq!(timer.last_delta(), Duration::ZERO);
        assert_eq!(timer.ticks(), 0);
    }
}
