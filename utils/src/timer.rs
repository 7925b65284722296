use std::time::{Duration, Instant};

/// Wall-clock stopwatch. Starts running on creation, [`Timer::start`] resets it.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Restarts the measurement from now.
    pub fn start(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Milliseconds elapsed since the last start, with sub-millisecond precision.
    pub fn milliseconds(&self) -> f32 {
        self.elapsed().as_secs_f32() * 1000.0
    }

    pub fn microseconds(&self) -> f32 {
        self.elapsed().as_secs_f32() * 1_000_000.0
    }
}
