//! Identity claim loop: probe → (claimed | conflicted) → announce.
//!
//! Before the stack answers for an address it must prove nobody else holds
//! it.  Three broadcast ARP probes per candidate, spaced by a uniform
//! random 1–2 s delay, give any current owner time to object; the RX path
//! reports objections through
//! [`StackIdentity::note_arp_seen`](crate::identity::StackIdentity::note_arp_seen).
//! Survivors are promoted and announced with one gratuitous ARP reply per
//! address.  The claimed set is fixed for the lifetime of the process.

use std::sync::Arc;

use log::{debug, info, warn};
use rand::Rng;
use tapnet_wire::arp::{ArpOperation, ArpPacket};
use tapnet_wire::{Ipv4Addr, MacAddr};

use crate::clock::Clock;
use crate::handler::PacketHandler;
use crate::identity::StackIdentity;

/// Probe transmissions per candidate.
pub const PROBE_ROUNDS: usize = 3;
/// Bounds of the uniform random inter-probe delay.
pub const PROBE_DELAY_MIN_MS: u64 = 1_000;
pub const PROBE_DELAY_MAX_MS: u64 = 2_000;

/// Run duplicate-address detection for every candidate, then freeze and
/// announce the claimed set.  Blocks the calling thread for the probe
/// delays; the RX pipeline must already be running so conflicts are seen.
pub fn run_claim(handler: &PacketHandler, identity: &Arc<StackIdentity>, clock: &dyn Clock) {
    let mut rng = rand::thread_rng();

    for _ in 0..PROBE_ROUNDS {
        // Candidates marked conflicting in an earlier round are not worth
        // probing again.
        for addr in identity.probing_candidates() {
            send_probe(handler, identity.mac(), addr);
            debug!("claim: sent ARP probe for {addr}");
        }
        clock.sleep_ms(rng.gen_range(PROBE_DELAY_MIN_MS..=PROBE_DELAY_MAX_MS));
    }

    let (claimed, conflicted) = identity.promote();
    for addr in &conflicted {
        warn!("claim: unable to claim {addr}, address in use");
    }
    for addr in &claimed {
        debug!("claim: claimed {addr}");
        send_announcement(handler, identity.mac(), *addr);
    }

    info!(
        "claim: listening on {:?}, broadcast {:?}",
        claimed,
        identity.broadcast_set()
    );
}

/// ARP probe: a broadcast REQUEST with an unspecified sender protocol
/// address, so it cannot itself be taken for a claim.
fn send_probe(handler: &PacketHandler, mac: MacAddr, addr: Ipv4Addr) {
    let probe = ArpPacket {
        oper: ArpOperation::Request,
        sha: mac,
        spa: Ipv4Addr::UNSPECIFIED,
        tha: MacAddr::ZERO,
        tpa: addr,
    };
    handler.tx_arp(MacAddr::BROADCAST, &probe, handler.origin_tag());
}

/// Gratuitous ARP reply advertising the claim: sender and target both name
/// the claimed address and our MAC.
fn send_announcement(handler: &PacketHandler, mac: MacAddr, addr: Ipv4Addr) {
    let announcement = ArpPacket {
        oper: ArpOperation::Reply,
        sha: mac,
        spa: addr,
        tha: mac,
        tpa: addr,
    };
    handler.tx_arp(MacAddr::BROADCAST, &announcement, handler.origin_tag());
}
