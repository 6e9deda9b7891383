//! Sweep timer: ages the ARP cache and expires deferred frames.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::arp_cache::ArpCache;
use crate::clock::Clock;
use crate::egress;

/// Interval between cache sweeps.
pub const SWEEP_INTERVAL_MS: u64 = 1_000;

/// Loop of the timer thread.  Exits when the stop flag is raised; worst
/// case one sweep interval late.
pub fn run(cache: &ArpCache, clock: &dyn Clock, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        clock.sleep_ms(SWEEP_INTERVAL_MS);
        egress::drop_expired(cache.sweep(clock.now_ms()));
    }
}
