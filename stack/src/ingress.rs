//! Ingress pipeline: the transport read side feeding the RX ring.
//!
//! A dedicated producer thread reads whole frames from the TAP device,
//! parses the Ethernet header, attaches the diagnostic tag (serial,
//! receive timestamp), and appends to the RX ring.  The ring is bounded
//! and never drops on overflow: a full ring blocks the producer, which in
//! turn backpressures the kernel queue.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use tapnet_wire::ethernet::{self, EthernetFrame};

use crate::clock::Clock;
use crate::ring::{FrameTag, RxFrame, RxRing};
use crate::tap::TapDevice;

/// Producer loop of the ingress thread.
///
/// Returns `Ok(())` on cooperative shutdown (ring closed or stop flag).
/// A transport read error is fatal and propagates to the caller.
pub fn run(
    tap: &TapDevice,
    ring: &RxRing,
    clock: &dyn Clock,
    mtu: usize,
    stop: &AtomicBool,
) -> io::Result<()> {
    // One frame per read; the buffer bounds every downstream allocation.
    let mut buf = vec![0u8; ethernet::HEADER_LEN + mtu];
    let mut serial = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let len = tap.read_frame(&mut buf)?;
        let tag = FrameTag::new(serial, clock.now_ms());

        match EthernetFrame::parse(&buf[..len]) {
            Ok(frame) => {
                if ring.push(RxFrame { frame, tag }).is_err() {
                    // Ring closed under us: shutdown in progress.
                    return Ok(());
                }
                serial += 1;
            }
            Err(err) => debug!("ingress: drop {len} byte frame {tag}: {err}"),
        }
    }
    Ok(())
}
