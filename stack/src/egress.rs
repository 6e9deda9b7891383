//! Egress pipeline: the TX ring consumer feeding the transport write side.
//!
//! Frames arrive fully formed.  A zero destination MAC is the sentinel for
//! "resolve via ARP": the inner IPv4 destination is looked up in the cache;
//! on a hit the MAC is filled in and the frame written out, on a miss the
//! frame is deferred onto the cache's pending queue and a single broadcast
//! ARP request goes out.  Deferred frames come back through the ring when
//! the RX handler learns the mapping; the sweep timer expires the ones
//! that never resolve.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use tapnet_wire::arp::{ArpOperation, ArpPacket};
use tapnet_wire::ethernet::EthernetFrame;
use tapnet_wire::{EtherType, Ipv4Addr, MacAddr};

use crate::arp_cache::{ArpCache, ResolveOutcome};
use crate::clock::Clock;
use crate::identity::StackIdentity;
use crate::ring::{TxFrame, TxRing};
use crate::tap::TapDevice;

/// Consumer loop of the egress thread.
///
/// Returns `Ok(())` on cooperative shutdown.  A transport write error is
/// fatal and propagates to the caller.
pub fn run(
    tap: &TapDevice,
    ring: &TxRing,
    cache: &ArpCache,
    identity: &StackIdentity,
    clock: &dyn Clock,
    stop: &AtomicBool,
) -> io::Result<()> {
    while !stop.load(Ordering::Relaxed) {
        let Some(mut frame) = ring.pop() else {
            break;
        };

        if frame.needs_resolution() {
            let Some(dst_ip) = frame.inner_ipv4_dst() else {
                debug!("egress: sentinel frame without inner IPv4, dropping {}", frame.tag);
                continue;
            };

            // Broadcast destinations never go through the cache.
            if identity.is_broadcast_destination(dst_ip) {
                frame.frame.dst = MacAddr::BROADCAST;
                tap.write_frame(&frame.frame.emit())?;
                continue;
            }

            match cache.resolve(dst_ip, frame, clock.now_ms()) {
                ResolveOutcome::Resolved(resolved) => {
                    tap.write_frame(&resolved.frame.emit())?;
                }
                ResolveOutcome::Queued { send_request } => {
                    if send_request {
                        send_arp_request(tap, identity, dst_ip)?;
                    }
                }
            }
            continue;
        }

        tap.write_frame(&frame.frame.emit())?;
    }
    Ok(())
}

/// Broadcast one ARP request for `target`.  Written directly — the request
/// must not loop back through the ring it is unblocking.
fn send_arp_request(tap: &TapDevice, identity: &StackIdentity, target: Ipv4Addr) -> io::Result<()> {
    let request = ArpPacket {
        oper: ArpOperation::Request,
        sha: identity.mac(),
        // Pre-claim this degenerates to a probe, which is harmless.
        spa: identity.first_claimed().unwrap_or(Ipv4Addr::UNSPECIFIED),
        tha: MacAddr::ZERO,
        tpa: target,
    };
    let frame = EthernetFrame::new(
        MacAddr::BROADCAST,
        identity.mac(),
        EtherType::Arp,
        request.emit(),
    );
    debug!("egress: arp request for {target}");
    tap.write_frame(&frame.emit())
}

/// Drop expired deferred frames returned by the cache sweep, one log line
/// each.
pub fn drop_expired(frames: Vec<TxFrame>) {
    for frame in frames {
        log::info!(
            "egress: arp resolution timed out, dropping frame {}",
            frame.tag
        );
    }
}
