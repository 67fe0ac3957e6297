//! CPU Clock.
use std::{
    thread,
    time::{Duration, Instant},
};

/// Timer to synchronize thread with the software clock of the virtual CPU.
///
/// It is designed to work with the yielding cooperative pattern
/// of the interpreter loop. When the VM yields control back to the
/// caller, time elapses until it is resumed. Once the interpreter
/// is resumed, the elapsed time is taken into account when determining
/// the next cycle.
///
/// A zero interval never blocks.
#[derive(Debug, Clone)]
pub struct Clock {
    interval: Duration,
    start: Instant,
}

impl Clock {
    /// Creates a new clock with the current time as internal state.
    pub fn new(interval: impl Into<Duration>) -> Self {
        Self {
            interval: interval.into(),
            start: Instant::now(),
        }
    }

    /// Set the clock state back to zero.
    pub fn reset(&mut self) {
        self.start = Instant::now()
    }

    /// Block the current thread until the next clock cycle.
    pub fn wait(&mut self) {
        loop {
            if self.start.elapsed() < self.interval {
                // Sleep does not have enough resolution, and causes
                // the clock to run at 30 FPS.
                //
                // Spinning a loop causes high CPU usage and fan madness.
                //
                // Yielding in a loop is the best alternative.
                thread::yield_now();
            } else {
                // Reset back to zero, rather than trying to catch up.
                //
                // If the VM was paused for debugging, and a large
                // amount of time has elapsed until it is resumed,
                // it should simply continue at the next cycle running
                // at its usual speed.
                self.reset();
                return;
            }
        }
    }
}
