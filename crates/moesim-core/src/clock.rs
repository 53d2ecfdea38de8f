//! Virtual clock for the discrete-event simulation.
//!
//! The [`SimClock`] only moves when the engine delivers events or a caller
//! advances it, so every animation delay (routing hold, batch processing,
//! display hold) can be replayed instantly and deterministically in tests.

use serde::{Deserialize, Serialize};

/// Virtual simulation clock, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    current_ms: u64,
}

impl SimClock {
    /// Create a new clock starting at time zero.
    pub fn new() -> Self {
        Self { current_ms: 0 }
    }

    /// Current time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.current_ms
    }

    /// Advance the clock to an absolute time.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `ms` is in the past.
    pub fn advance_to_ms(&mut self, ms: u64) {
        debug_assert!(
            ms >= self.current_ms,
            "Cannot move clock backwards: current={}ms, target={}ms",
            self.current_ms,
            ms,
        );
        self.current_ms = ms;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}
