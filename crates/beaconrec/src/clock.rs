//! Millisecond uptime clock.

use std::time::{Duration, Instant};

/// Uptime source and blocking delay.
pub trait Clock {
    /// Milliseconds since boot. Wraps after about 49 days.
    fn now_ms(&self) -> u32;

    /// Block for `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u32);
}

/// Clock backed by the host's monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    /// Start counting from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> u32 {
        // Truncation gives the same wraparound as a 32-bit tick counter.
        self.boot.elapsed().as_millis() as u32
    }

    fn sleep_ms(&mut self, ms: u32) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(u64::from(ms)));
        }
    }
}
