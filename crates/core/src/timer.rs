//! Frame timing.

use std::time::{Duration, Instant};

/// Monotonic timer feeding per-frame delta time to the render loop.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_frame: Instant,
}

impl FrameTimer {
    /// Create a timer anchored at now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
        }
    }

    /// Total time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous `advance()` call, marking a new frame.
    pub fn advance(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_frame;
        self.last_frame = now;
        delta
    }

    /// Delta time in seconds since the previous frame.
    pub fn delta_secs(&mut self) -> f32 {
        self.advance().as_secs_f32()
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_monotonic() {
        let mut timer = FrameTimer::new();
        let first = timer.advance();
        let second = timer.advance();
        assert!(first >= Duration::ZERO);
        assert!(second >= Duration::ZERO);
    }

    #[test]
    fn elapsed_grows() {
        let timer = FrameTimer::new();
        let a = timer.elapsed();
        let b = timer.elapsed();
        assert!(b >= a);
    }
}
