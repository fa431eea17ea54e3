//! Adaptive capture rate

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// What the capture loop should do after a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// On time: sleep out the rest of the interval.
    Sleep(Duration),
    /// Behind schedule: start the next cycle immediately at `rate`.
    Behind { rate: u32 },
}

/// Throttles a feed's capture rate to what the sensor and encoder sustain.
///
/// The rate starts at `target_fps` and drops by one each time a cycle
/// overruns its interval, never below `min_fps`. By default it never comes
/// back up. With a recovery threshold of N it steps up by one after N
/// consecutive cycles that would also have fit the next-higher rate.
///
/// Written only by the capture loop; viewers read the rate concurrently.
#[derive(Debug)]
pub struct RateGovernor {
    current: AtomicU32,
    target_fps: u32,
    min_fps: u32,
    recovery_cycles: Option<u32>,
    on_time_streak: AtomicU32,
}

impl RateGovernor {
    /// `min_fps` is raised to 1 and capped at `target_fps`.
    pub fn new(target_fps: u32, min_fps: u32) -> Self {
        let target_fps = target_fps.max(1);
        Self {
            current: AtomicU32::new(target_fps),
            target_fps,
            min_fps: min_fps.clamp(1, target_fps),
            recovery_cycles: None,
            on_time_streak: AtomicU32::new(0),
        }
    }

    pub fn with_recovery(mut self, cycles: Option<u32>) -> Self {
        self.recovery_cycles = cycles.filter(|&n| n > 0);
        self
    }

    pub fn current_rate(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn min_fps(&self) -> u32 {
        self.min_fps
    }

    /// Interval between frames at the current rate
    pub fn interval(&self) -> Duration {
        interval_for(self.current_rate())
    }

    /// Account for one capture+encode cycle that took `elapsed`.
    pub fn after_cycle(&self, elapsed: Duration) -> Pace {
        let rate = self.current_rate();
        let interval = interval_for(rate);

        if elapsed >= interval {
            self.on_time_streak.store(0, Ordering::Relaxed);
            let next = rate.saturating_sub(1).max(self.min_fps);
            self.current.store(next, Ordering::Release);
            return Pace::Behind { rate: next };
        }

        if let Some(threshold) = self.recovery_cycles {
            self.track_recovery(rate, elapsed, threshold);
        }
        Pace::Sleep(interval - elapsed)
    }

    fn track_recovery(&self, rate: u32, elapsed: Duration, threshold: u32) {
        if rate >= self.target_fps || elapsed >= interval_for(rate + 1) {
            self.on_time_streak.store(0, Ordering::Relaxed);
            return;
        }
        let streak = self.on_time_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= threshold {
            self.on_time_streak.store(0, Ordering::Relaxed);
            self.current.store(rate + 1, Ordering::Release);
        }
    }
}

fn interval_for(rate: u32) -> Duration {
    Duration::from_secs(1) / rate.max(1)
}
