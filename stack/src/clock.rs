//! Logical clock abstraction.
//!
//! Everything in the stack that reads time or sleeps goes through [`Clock`],
//! so tests can drive the claim loop and cache aging deterministically
//! instead of racing real timers.  Milliseconds since an arbitrary origin;
//! only differences are meaningful.

use std::thread;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock's origin.
    fn now_ms(&self) -> u64;

    /// Block the calling thread for `ms` milliseconds.
    fn sleep_ms(&self, ms: u64);
}

/// Wall-clock implementation backed by [`Instant`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Deterministic clock for tests: `sleep_ms` advances `now_ms` instantly.
#[cfg(test)]
pub struct MockClock {
    now: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl MockClock {
    pub fn new() -> Self {
        Self {
            now: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.now.fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }
}
