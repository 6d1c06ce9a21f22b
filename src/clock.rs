// ===============================
// src/clock.rs
// ===============================
use std::time::Instant;

/// Monotonic nanosecond clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonoClock {
    origin: Instant,
}

impl MonoClock {
    pub fn start() -> Self {
        Self { origin: Instant::now() }
    }

    pub fn now_ns(&self) -> u64 {
        // u64 nanoseconds cover ~584 years of uptime
        self.origin.elapsed().as_nanos() as u64
    }
}

impl Default for MonoClock {
    fn default() -> Self {
        Self::start()
    }
}
