//! Time keeping for work that must be spread over several ticks.

use std::time::{Duration, Instant};

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// [`Clock`] reading the system monotonic clock.
#[derive(Debug, Default, Copy, Clone)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Wall-clock allowance for one tick of work.
#[derive(Debug)]
pub struct Budget<'a, C: ?Sized> {
    clock: &'a C,
    deadline: Instant,
}

impl<'a, C: Clock + ?Sized> Budget<'a, C> {
    pub fn new(clock: &'a C, allowance: Duration) -> Self {
        Self {
            deadline: clock.now() + allowance,
            clock,
        }
    }

    /// True once the allowance is used up.
    pub fn exhausted(&self) -> bool {
        self.clock.now() >= self.deadline
    }
}

/// Outcome of one slice of resumable work.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Out of time, call again to continue where it stopped.
    Pending,
    Done,
}
