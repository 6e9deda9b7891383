//! End-to-end scenarios for the RX dispatch and TX composition paths,
//! driven synchronously through `PacketHandler::step` with hand-built
//! frames.  Assertions read the TX ring the way the egress thread would.

use std::sync::{Arc, Mutex};

use tapnet_wire::arp::{ArpOperation, ArpPacket};
use tapnet_wire::ethernet;
use tapnet_wire::icmpv4::Icmpv4Message;
use tapnet_wire::ipv4::{self, Ipv4Packet};
use tapnet_wire::tcp::{TcpFlags, TcpSegment};
use tapnet_wire::udp::{self, UdpDatagram};
use tapnet_wire::{Endpoint, EtherType, IpProtocol, Ipv4Addr, MacAddr, Port};

use crate::arp_cache::ResolveOutcome;
use crate::config::{ArpPolicy, DEFAULT_MTU};
use crate::ring::{FrameTag, TxFrame};
use crate::socket::{TcpListener, UdpSocket};
use crate::testutil::*;

const OTHER_MAC: MacAddr = MacAddr([0xde, 0xad, 0xbe, 0xef, 0x00, 0x02]);

// =============================================================================
// ARP
// =============================================================================

#[test]
fn arp_request_for_claimed_address_gets_reply() {
    let harness = Harness::claimed(ArpPolicy::default());
    harness.handler.step(arp_request(STACK_IP));

    let sent = only_sent(&harness);
    assert_eq!(sent.frame.dst, PEER_MAC);
    assert_eq!(sent.frame.src, STACK_MAC);
    assert_eq!(sent.frame.ethertype, EtherType::Arp);
    // The reply carries the request's diagnostic tag.
    assert_eq!(sent.tag, tag(7));

    let reply = ArpPacket::parse(&sent.frame.payload).unwrap();
    assert_eq!(reply.oper, ArpOperation::Reply);
    assert_eq!(reply.sha, STACK_MAC);
    assert_eq!(reply.spa, STACK_IP);
    assert_eq!(reply.tha, PEER_MAC);
    assert_eq!(reply.tpa, PEER_IP);
}

#[test]
fn arp_request_for_foreign_address_is_ignored() {
    let harness = Harness::claimed(ArpPolicy::default());
    harness.handler.step(arp_request(Ipv4Addr([192, 168, 9, 200])));
    assert!(harness.sent().is_empty());
}

#[test]
fn arp_reply_learning_respects_sources() {
    // A unicast reply is always learned.
    let harness = Harness::claimed(ArpPolicy::default());
    harness.handler.step(arp_reply(PEER_MAC, PEER_IP, false));
    assert_eq!(harness.cache.entry_count(), 1);

    // A gratuitous (broadcast) reply is learned under the default policy...
    let harness = Harness::claimed(ArpPolicy::default());
    harness.handler.step(arp_reply(PEER_MAC, PEER_IP, true));
    assert_eq!(harness.cache.entry_count(), 1);

    // ...but not when gratuitous updates are disabled.
    let harness = Harness::claimed(ArpPolicy::BYPASS_ON_RESPONSE);
    harness.handler.step(arp_reply(PEER_MAC, PEER_IP, true));
    assert_eq!(harness.cache.entry_count(), 0);
}

#[test]
fn arp_request_learning_is_off_by_default() {
    let harness = Harness::claimed(ArpPolicy::default());
    harness.handler.step(arp_request(STACK_IP));
    assert_eq!(harness.cache.entry_count(), 0);

    let harness = Harness::claimed(
        ArpPolicy::default() | ArpPolicy::UPDATE_FROM_DIRECT_REQUEST,
    );
    harness.handler.step(arp_request(STACK_IP));
    assert_eq!(harness.cache.entry_count(), 1);
}

#[test]
fn arp_reply_flushes_deferred_frames_in_order() {
    let harness = Harness::claimed(ArpPolicy::default());

    // Two frames parked on the pending queue, as the egress thread would
    // leave them after a cache miss.
    for serial in [1, 2] {
        let pkt = udp_packet(STACK_IP, PEER_IP, Port(1), Port(2), b"x");
        let frame = TxFrame {
            frame: tapnet_wire::ethernet::EthernetFrame::new(
                MacAddr::ZERO,
                STACK_MAC,
                EtherType::Ipv4,
                pkt.emit(),
            ),
            tag: FrameTag::new(serial, 0),
        };
        assert!(matches!(
            harness.cache.resolve(PEER_IP, frame, 0),
            ResolveOutcome::Queued { .. }
        ));
    }

    harness.handler.step(arp_reply(PEER_MAC, PEER_IP, false));

    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent.iter().map(|f| f.tag.serial).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert!(sent.iter().all(|f| f.frame.dst == PEER_MAC));
}

#[test]
fn conflict_during_probe_window_blocks_claim() {
    let harness = Harness::probing(ArpPolicy::default());
    // Someone else answers with our candidate as sender.
    harness.handler.step(arp_reply(OTHER_MAC, STACK_IP, true));

    let (claimed, conflicted) = harness.identity.promote();
    assert!(claimed.is_empty());
    assert_eq!(conflicted, vec![STACK_IP]);

    // And the stack must not answer ARP for the lost address.
    harness.handler.step(arp_request(STACK_IP));
    assert!(harness.sent().is_empty());
}

// =============================================================================
// Ethernet filter
// =============================================================================

#[test]
fn frames_for_foreign_macs_are_dropped() {
    let harness = Harness::claimed(ArpPolicy::default());
    let mut frame = arp_request(STACK_IP);
    frame.frame.dst = OTHER_MAC;
    harness.handler.step(frame);
    assert!(harness.sent().is_empty());
}

// =============================================================================
// ICMPv4 echo
// =============================================================================

#[test]
fn echo_request_gets_mirrored_reply() {
    let harness = Harness::claimed(ArpPolicy::default());
    let echo = Icmpv4Message::EchoRequest {
        id: 0x1234,
        seq: 1,
        data: b"hello".to_vec(),
    };
    let request = ipv4_packet(PEER_IP, STACK_IP, IpProtocol::Icmp, echo.emit());
    harness.handler.step(ipv4_rx(&request));

    let sent = only_sent(&harness);
    // Bypass policy is on: the reply goes straight to the requester.
    assert_eq!(sent.frame.dst, PEER_MAC);

    // Parsing validates the IPv4 header checksum.
    let ip = Ipv4Packet::parse(&sent.frame.payload).unwrap();
    assert_eq!(ip.src, STACK_IP);
    assert_eq!(ip.dst, PEER_IP);
    assert_eq!(ip.ttl, ipv4::DEFAULT_TTL);
    assert_eq!(ip.protocol, IpProtocol::Icmp);

    // Parsing validates the ICMP checksum.
    let reply = Icmpv4Message::parse(&ip.payload).unwrap();
    assert_eq!(
        reply,
        Icmpv4Message::EchoReply {
            id: 0x1234,
            seq: 1,
            data: b"hello".to_vec(),
        }
    );
}

#[test]
fn echo_to_directed_broadcast_answers_from_claimed_address() {
    let harness = Harness::claimed(ArpPolicy::default());
    let echo = Icmpv4Message::EchoRequest {
        id: 9,
        seq: 9,
        data: Vec::new(),
    };
    let request = ipv4_packet(
        PEER_IP,
        Ipv4Addr([192, 168, 9, 255]),
        IpProtocol::Icmp,
        echo.emit(),
    );
    harness.handler.step(ipv4_rx(&request));

    let sent = only_sent(&harness);
    let ip = Ipv4Packet::parse(&sent.frame.payload).unwrap();
    // A broadcast destination is nobody's source address.
    assert_eq!(ip.src, STACK_IP);
}

#[test]
fn replies_use_arp_sentinel_when_bypass_is_off() {
    let harness = Harness::claimed(ArpPolicy::UPDATE_FROM_GRATUITOUS);
    let echo = Icmpv4Message::EchoRequest {
        id: 1,
        seq: 1,
        data: Vec::new(),
    };
    let request = ipv4_packet(PEER_IP, STACK_IP, IpProtocol::Icmp, echo.emit());
    harness.handler.step(ipv4_rx(&request));

    let sent = only_sent(&harness);
    assert!(sent.needs_resolution());
    assert_eq!(sent.inner_ipv4_dst(), Some(PEER_IP));
}

// =============================================================================
// IPv4 policy drops
// =============================================================================

#[test]
fn inbound_fragments_are_dropped_silently() {
    let harness = Harness::claimed(ArpPolicy::default());
    let mut pkt = udp_packet(PEER_IP, STACK_IP, Port(1), Port(2), b"frag");
    pkt.more_fragments = true;
    harness.handler.step(ipv4_rx(&pkt));
    assert!(harness.sent().is_empty());
}

#[test]
fn packets_for_other_destinations_are_dropped() {
    let harness = Harness::claimed(ArpPolicy::default());
    let pkt = udp_packet(PEER_IP, Ipv4Addr([192, 168, 9, 99]), Port(1), Port(2), b"x");
    harness.handler.step(ipv4_rx(&pkt));
    assert!(harness.sent().is_empty());
}

// =============================================================================
// UDP
// =============================================================================

struct UdpSink {
    seen: Mutex<Vec<(Endpoint, Vec<u8>, FrameTag)>>,
}

impl UdpSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl UdpSocket for UdpSink {
    fn deliver(&self, src: Endpoint, payload: &[u8], tag: FrameTag) {
        self.seen.lock().unwrap().push((src, payload.to_vec(), tag));
    }
}

#[test]
fn udp_is_delivered_to_a_listening_socket() {
    let harness = Harness::claimed(ArpPolicy::default());
    let sink = UdpSink::new();
    harness
        .udp_sockets
        .register(Endpoint::new(STACK_IP, Port(9999)), sink.clone())
        .unwrap();

    let src = Ipv4Addr([10, 0, 0, 5]);
    let pkt = udp_packet(src, STACK_IP, Port(5000), Port(9999), b"datagram");
    harness.handler.step(ipv4_rx(&pkt));

    let seen = sink.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, Endpoint::new(src, Port(5000)));
    assert_eq!(seen[0].1, b"datagram");
    assert_eq!(seen[0].2, tag(7));
    drop(seen);

    // Delivered, so no ICMP.
    assert!(harness.sent().is_empty());
}

#[test]
fn closed_udp_port_earns_port_unreachable() {
    let harness = Harness::claimed(ArpPolicy::default());
    let src = Ipv4Addr([10, 0, 0, 5]);
    let pkt = udp_packet(src, STACK_IP, Port(5000), Port(9999), b"payload-123");
    let original = pkt.emit();
    harness.handler.step(ipv4_rx(&pkt));

    let sent = only_sent(&harness);
    let ip = Ipv4Packet::parse(&sent.frame.payload).unwrap();
    assert_eq!(ip.protocol, IpProtocol::Icmp);
    assert_eq!(ip.src, STACK_IP);
    assert_eq!(ip.dst, src);

    match Icmpv4Message::parse(&ip.payload).unwrap() {
        Icmpv4Message::PortUnreachable { data } => {
            // The quote is the original IPv4 header plus 8 payload bytes —
            // exactly the UDP header here.
            assert_eq!(data, original[..ipv4::HEADER_LEN + 8].to_vec());
        }
        other => panic!("expected port unreachable, got {other:?}"),
    }
}

#[test]
fn closed_udp_port_from_zero_source_is_dropped_silently() {
    let harness = Harness::claimed(ArpPolicy::default());
    let pkt = udp_packet(
        Ipv4Addr::UNSPECIFIED,
        STACK_IP,
        Port(0),
        Port(9999),
        b"bootp?",
    );
    harness.handler.step(ipv4_rx(&pkt));
    assert!(harness.sent().is_empty());
}

#[test]
fn udp_with_bad_checksum_is_dropped() {
    let harness = Harness::claimed(ArpPolicy::default());
    let sink = UdpSink::new();
    harness
        .udp_sockets
        .register(Endpoint::new(STACK_IP, Port(9999)), sink.clone())
        .unwrap();

    let mut pkt = udp_packet(PEER_IP, STACK_IP, Port(5000), Port(9999), b"corrupt-me");
    pkt.payload[10] ^= 0xff; // flip a data byte under the UDP checksum
    harness.handler.step(ipv4_rx(&pkt));

    assert!(sink.seen.lock().unwrap().is_empty());
    assert!(harness.sent().is_empty());
}

#[test]
fn udp_wildcard_socket_catches_any_local_address() {
    let harness = Harness::claimed(ArpPolicy::default());
    let sink = UdpSink::new();
    harness
        .udp_sockets
        .register(Endpoint::new(Ipv4Addr::UNSPECIFIED, Port(68)), sink.clone())
        .unwrap();

    let pkt = udp_packet(PEER_IP, STACK_IP, Port(67), Port(68), b"lease");
    harness.handler.step(ipv4_rx(&pkt));
    assert_eq!(sink.seen.lock().unwrap().len(), 1);
    assert!(harness.sent().is_empty());
}

// =============================================================================
// TCP stub
// =============================================================================

fn tcp_rx(seg: &TcpSegment, src: Ipv4Addr, dst: Ipv4Addr) -> Ipv4Packet {
    ipv4_packet(src, dst, IpProtocol::Tcp, seg.emit(src, dst))
}

fn syn(seq: u32) -> TcpSegment {
    TcpSegment {
        src_port: Port(40000),
        dst_port: Port(80),
        seq,
        ack: 0,
        flags: TcpFlags::SYN,
        window: 65535,
        urgent: 0,
        options: Vec::new(),
        payload: Vec::new(),
    }
}

#[test]
fn syn_to_closed_port_is_reset() {
    let harness = Harness::claimed(ArpPolicy::default());
    harness
        .handler
        .step(ipv4_rx(&tcp_rx(&syn(1000), PEER_IP, STACK_IP)));

    let sent = only_sent(&harness);
    let ip = Ipv4Packet::parse(&sent.frame.payload).unwrap();
    assert_eq!(ip.protocol, IpProtocol::Tcp);
    assert!(tapnet_wire::tcp::verify_checksum(&ip.payload, ip.src, ip.dst));

    let rst = TcpSegment::parse(&ip.payload).unwrap();
    assert_eq!(rst.flags, TcpFlags::RST | TcpFlags::ACK);
    assert_eq!(rst.seq, 0);
    assert_eq!(rst.ack, 1001);
    assert_eq!(rst.src_port, Port(80));
    assert_eq!(rst.dst_port, Port(40000));
}

#[test]
fn ack_bearing_segment_is_reset_at_its_own_ack() {
    let harness = Harness::claimed(ArpPolicy::default());
    let mut seg = syn(500);
    seg.flags = TcpFlags::ACK;
    seg.ack = 2000;
    harness
        .handler
        .step(ipv4_rx(&tcp_rx(&seg, PEER_IP, STACK_IP)));

    let sent = only_sent(&harness);
    let ip = Ipv4Packet::parse(&sent.frame.payload).unwrap();
    let rst = TcpSegment::parse(&ip.payload).unwrap();
    assert_eq!(rst.seq, 2000);
    assert_eq!(rst.ack, 500);
}

#[test]
fn rst_never_answers_rst() {
    let harness = Harness::claimed(ArpPolicy::default());
    let mut seg = syn(1);
    seg.flags = TcpFlags::RST;
    harness
        .handler
        .step(ipv4_rx(&tcp_rx(&seg, PEER_IP, STACK_IP)));
    assert!(harness.sent().is_empty());
}

struct TcpSink {
    seen: Mutex<Vec<(Endpoint, TcpSegment)>>,
}

impl TcpListener for TcpSink {
    fn deliver(&self, src: Endpoint, segment: &TcpSegment, _tag: FrameTag) {
        self.seen.lock().unwrap().push((src, segment.clone()));
    }
}

#[test]
fn tcp_listener_preempts_the_reset_stub() {
    let harness = Harness::claimed(ArpPolicy::default());
    let sink = Arc::new(TcpSink {
        seen: Mutex::new(Vec::new()),
    });
    harness
        .tcp_sockets
        .register(Endpoint::new(STACK_IP, Port(80)), sink.clone())
        .unwrap();

    harness
        .handler
        .step(ipv4_rx(&tcp_rx(&syn(1000), PEER_IP, STACK_IP)));

    assert_eq!(sink.seen.lock().unwrap().len(), 1);
    assert!(harness.sent().is_empty());
}

// =============================================================================
// TX composition and fragmentation
// =============================================================================

#[test]
fn small_datagrams_go_out_whole_with_sequential_ids() {
    let harness = Harness::claimed(ArpPolicy::default());
    for _ in 0..2 {
        harness.handler.tx_udp(
            None,
            PEER_IP,
            Port(5000),
            Port(7000),
            &[0x55; 100],
            None,
            tag(0),
        );
    }

    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    let first = Ipv4Packet::parse(&sent[0].frame.payload).unwrap();
    let second = Ipv4Packet::parse(&sent[1].frame.payload).unwrap();
    assert!(!first.is_fragment());
    assert_eq!(second.id, first.id.wrapping_add(1));
    // Sentinel destination: the egress thread resolves it via ARP.
    assert!(sent[0].needs_resolution());
}

#[test]
fn oversized_datagram_is_fragmented_on_eight_byte_boundaries() {
    let harness = Harness::claimed(ArpPolicy::default());
    harness.handler.tx_udp(
        None,
        PEER_IP,
        Port(5000),
        Port(7000),
        &[0xab; 3000],
        None,
        tag(0),
    );

    let sent = harness.sent();
    assert_eq!(sent.len(), 3);

    let fragments: Vec<Ipv4Packet> = sent
        .iter()
        .map(|f| Ipv4Packet::parse(&f.frame.payload).unwrap())
        .collect();

    // One shared id, monotonically increasing offsets, MF on all but the
    // last fragment.
    assert!(fragments.iter().all(|f| f.id == fragments[0].id));
    assert_eq!(
        fragments.iter().map(|f| f.frag_offset).collect::<Vec<_>>(),
        vec![0, 185, 370]
    );
    assert_eq!(
        fragments.iter().map(|f| f.more_fragments).collect::<Vec<_>>(),
        vec![true, true, false]
    );
    assert_eq!(
        fragments.iter().map(|f| f.payload.len()).collect::<Vec<_>>(),
        vec![1480, 1480, 48]
    );

    // No frame exceeds MTU plus the Ethernet header.
    for frame in &sent {
        assert!(frame.frame.emit().len() <= DEFAULT_MTU + ethernet::HEADER_LEN);
    }

    // Concatenating the fragment payloads in offset order reassembles the
    // datagram, and the checksum carried in the first fragment verifies
    // against the pseudo-header.
    let mut datagram = Vec::new();
    for fragment in &fragments {
        assert_eq!(fragment.frag_offset as usize * 8, datagram.len());
        datagram.extend_from_slice(&fragment.payload);
    }
    assert!(udp::verify_checksum(&datagram, STACK_IP, PEER_IP));

    let dgram = UdpDatagram::parse(&datagram).unwrap();
    assert_eq!(dgram.src_port, Port(5000));
    assert_eq!(dgram.dst_port, Port(7000));
    assert_eq!(dgram.payload, vec![0xab; 3000]);
}

#[test]
fn nothing_is_originated_without_a_claimed_address() {
    let harness = Harness::probing(ArpPolicy::default());
    harness
        .handler
        .tx_udp(None, PEER_IP, Port(1), Port(2), b"early", None, tag(0));
    assert!(harness.sent().is_empty());
}
