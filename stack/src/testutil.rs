//! Shared fixtures for the pipeline test suites: a fully wired handler on
//! a mock clock, and builders for the frames the scenarios inject.

use std::sync::Arc;

use tapnet_wire::arp::{ArpOperation, ArpPacket};
use tapnet_wire::ethernet::EthernetFrame;
use tapnet_wire::ipv4::{self, Ipv4Packet};
use tapnet_wire::udp::UdpDatagram;
use tapnet_wire::{EtherType, IpProtocol, Ipv4Addr, MacAddr, Port};

use crate::arp_cache::ArpCache;
use crate::clock::MockClock;
use crate::config::{ArpPolicy, Candidate, DEFAULT_MTU};
use crate::handler::PacketHandler;
use crate::identity::StackIdentity;
use crate::ring::{FrameTag, RxFrame, Ring, TxFrame, TxRing};
use crate::socket::{TcpRegistry, UdpRegistry};

pub const STACK_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x77, 0x77, 0x77]);
pub const STACK_IP: Ipv4Addr = Ipv4Addr([192, 168, 9, 7]);
pub const STACK_MASK: Ipv4Addr = Ipv4Addr([255, 255, 255, 0]);

pub const PEER_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01]);
pub const PEER_IP: Ipv4Addr = Ipv4Addr([192, 168, 9, 1]);

/// A handler with every collaborator attached, plus handles to the pieces
/// the tests poke at.
pub struct Harness {
    pub handler: PacketHandler,
    pub identity: Arc<StackIdentity>,
    pub cache: Arc<ArpCache>,
    pub tx_ring: Arc<TxRing>,
    pub clock: Arc<MockClock>,
    pub udp_sockets: Arc<UdpRegistry>,
    pub tcp_sockets: Arc<TcpRegistry>,
}

impl Harness {
    /// Identity still in the probe window.
    pub fn probing(policy: ArpPolicy) -> Self {
        let identity = Arc::new(StackIdentity::new(
            STACK_MAC,
            vec![Candidate::new(STACK_IP, STACK_MASK)],
        ));
        let cache = Arc::new(ArpCache::new(policy));
        let tx_ring: Arc<TxRing> = Arc::new(Ring::new(1024));
        let clock = Arc::new(MockClock::new());
        let udp_sockets = Arc::new(UdpRegistry::new());
        let tcp_sockets = Arc::new(TcpRegistry::new());
        let handler = PacketHandler::new(
            Arc::clone(&identity),
            Arc::clone(&cache),
            Arc::clone(&tx_ring),
            Arc::clone(&udp_sockets),
            Arc::clone(&tcp_sockets),
            clock.clone(),
            DEFAULT_MTU,
            policy,
        );
        Self {
            handler,
            identity,
            cache,
            tx_ring,
            clock,
            udp_sockets,
            tcp_sockets,
        }
    }

    /// Identity already past duplicate-address detection.
    pub fn claimed(policy: ArpPolicy) -> Self {
        let harness = Self::probing(policy);
        harness.identity.promote();
        harness
    }

    /// All frames currently on the TX ring, oldest first.
    pub fn sent(&self) -> Vec<TxFrame> {
        self.tx_ring.drain()
    }
}

pub fn tag(serial: u64) -> FrameTag {
    FrameTag::new(serial, 0)
}

pub fn rx(dst: MacAddr, src: MacAddr, ethertype: EtherType, payload: Vec<u8>) -> RxFrame {
    RxFrame {
        frame: EthernetFrame::new(dst, src, ethertype, payload),
        tag: tag(7),
    }
}

/// A broadcast ARP request from the peer for `tpa`.
pub fn arp_request(tpa: Ipv4Addr) -> RxFrame {
    let pkt = ArpPacket {
        oper: ArpOperation::Request,
        sha: PEER_MAC,
        spa: PEER_IP,
        tha: MacAddr::ZERO,
        tpa,
    };
    rx(MacAddr::BROADCAST, PEER_MAC, EtherType::Arp, pkt.emit())
}

/// An ARP reply from `(sha, spa)`, unicast to the stack or broadcast.
pub fn arp_reply(sha: MacAddr, spa: Ipv4Addr, broadcast: bool) -> RxFrame {
    let pkt = ArpPacket {
        oper: ArpOperation::Reply,
        sha,
        spa,
        tha: STACK_MAC,
        tpa: STACK_IP,
    };
    let dst = if broadcast {
        MacAddr::BROADCAST
    } else {
        STACK_MAC
    };
    rx(dst, sha, EtherType::Arp, pkt.emit())
}

/// An IPv4 packet from the peer wrapped in a unicast Ethernet frame.
pub fn ipv4_rx(pkt: &Ipv4Packet) -> RxFrame {
    rx(STACK_MAC, PEER_MAC, EtherType::Ipv4, pkt.emit())
}

pub fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, protocol: IpProtocol, payload: Vec<u8>) -> Ipv4Packet {
    Ipv4Packet {
        tos: 0,
        id: 0x0101,
        dont_fragment: false,
        more_fragments: false,
        frag_offset: 0,
        ttl: ipv4::DEFAULT_TTL,
        protocol,
        src,
        dst,
        payload,
    }
}

/// A UDP-in-IPv4 packet with a valid transport checksum.
pub fn udp_packet(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: Port,
    dst_port: Port,
    payload: &[u8],
) -> Ipv4Packet {
    let dgram = UdpDatagram {
        src_port,
        dst_port,
        payload: payload.to_vec(),
    };
    ipv4_packet(src, dst, IpProtocol::Udp, dgram.emit(src, dst))
}

/// Parse the single frame a scenario should have produced.
pub fn only_sent(harness: &Harness) -> TxFrame {
    let mut sent = harness.sent();
    assert_eq!(sent.len(), 1, "expected exactly one emitted frame");
    sent.remove(0)
}
