//! The packet handler — per-layer RX dispatch and TX composition.
//!
//! One aggregate owns both directions of the pipeline.  The RX side
//! (`rx.rs`) parses untrusted input layer by layer and routes it:
//! Ethernet → (ARP | IPv4) → (ICMP | UDP | TCP).  The TX side (`tx.rs`)
//! builds nested headers bottom-up, fragments at the MTU boundary, and
//! enqueues finished frames for the egress thread.
//!
//! # Concurrency
//!
//! [`run`] is the single-consumer loop of the RX handler thread.  All
//! shared state (cache, identity, rings, registries) is reached through
//! `Arc`s with their own synchronization; the handler itself holds nothing
//! mutable but a wrapping IP-id counter.  [`step`] processes exactly one
//! frame and is how tests drive the pipeline synchronously.
//!
//! [`run`]: PacketHandler::run
//! [`step`]: PacketHandler::step

mod rx;
mod tx;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use log::debug;
use tapnet_wire::{EtherType, MacAddr};

use crate::arp_cache::ArpCache;
use crate::clock::Clock;
use crate::config::ArpPolicy;
use crate::identity::StackIdentity;
use crate::ring::{FrameTag, RxFrame, RxRing, TxRing};
use crate::socket::{TcpRegistry, UdpRegistry};

pub struct PacketHandler {
    identity: Arc<StackIdentity>,
    cache: Arc<ArpCache>,
    tx_ring: Arc<TxRing>,
    udp_sockets: Arc<UdpRegistry>,
    tcp_sockets: Arc<TcpRegistry>,
    clock: Arc<dyn Clock>,
    mtu: usize,
    policy: ArpPolicy,
    ip_id: AtomicU16,
}

impl PacketHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<StackIdentity>,
        cache: Arc<ArpCache>,
        tx_ring: Arc<TxRing>,
        udp_sockets: Arc<UdpRegistry>,
        tcp_sockets: Arc<TcpRegistry>,
        clock: Arc<dyn Clock>,
        mtu: usize,
        policy: ArpPolicy,
    ) -> Self {
        Self {
            identity,
            cache,
            tx_ring,
            udp_sockets,
            tcp_sockets,
            clock,
            mtu,
            policy,
            ip_id: AtomicU16::new(0),
        }
    }

    /// Consumer loop of the RX handler thread.  Exits when the ring closes
    /// or the stop flag is raised.
    pub fn run(&self, rx_ring: &RxRing, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            match rx_ring.pop() {
                Some(frame) => self.step(frame),
                None => break,
            }
        }
    }

    /// Process exactly one received frame through the layered dispatch.
    pub fn step(&self, rx: RxFrame) {
        let RxFrame { frame, tag } = rx;

        // Destination MAC filter: ours or broadcast, nothing else.
        if frame.dst != self.identity.mac() && !frame.dst.is_broadcast() {
            return;
        }

        match frame.ethertype {
            EtherType::Arp => self.rx_arp(&frame, tag),
            EtherType::Ipv4 => self.rx_ipv4(&frame, tag),
        }
    }

    /// Fresh tag for traffic the stack originates.
    pub fn origin_tag(&self) -> FrameTag {
        FrameTag::origin(self.clock.now_ms())
    }

    /// Destination MAC for a reply frame: the requester's MAC when the
    /// bypass policy is on, otherwise the resolve-via-ARP sentinel.
    pub(crate) fn reply_mac(&self, requester: MacAddr) -> Option<MacAddr> {
        if self.policy.contains(ArpPolicy::BYPASS_ON_RESPONSE) {
            Some(requester)
        } else {
            debug!("ether: ARP bypass disabled, reply will resolve via cache");
            None
        }
    }
}
