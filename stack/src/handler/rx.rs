//! RX dispatch: parse, validate, route, and answer.
//!
//! Every drop is logged at debug and never unwinds; replies go back out
//! through the TX composition path with the tag of their request.

use log::debug;
use tapnet_wire::arp::{ArpOperation, ArpPacket};
use tapnet_wire::ethernet::EthernetFrame;
use tapnet_wire::icmpv4::Icmpv4Message;
use tapnet_wire::ipv4::Ipv4Packet;
use tapnet_wire::tcp::{self, TcpFlags, TcpSegment};
use tapnet_wire::udp::{self, UdpDatagram};
use tapnet_wire::{Endpoint, IpProtocol, Ipv4Addr, MacAddr};

use super::PacketHandler;
use crate::arp_cache::{CacheAction, LearnSource};
use crate::ring::FrameTag;

impl PacketHandler {
    // =========================================================================
    // ARP
    // =========================================================================

    pub(crate) fn rx_arp(&self, eth: &EthernetFrame, tag: FrameTag) {
        let pkt = match ArpPacket::parse(&eth.payload) {
            Ok(pkt) => pkt,
            Err(err) => {
                debug!("arp: drop {tag}: {err}");
                return;
            }
        };

        // Feed the claim-loop conflict watcher regardless of operation.
        self.identity.note_arp_seen(pkt.spa, pkt.sha);

        match pkt.oper {
            ArpOperation::Request => {
                if !pkt.spa.is_unspecified() {
                    self.learn(pkt.spa, pkt.sha, LearnSource::DirectRequest);
                }
                if self.identity.is_claimed(pkt.tpa) {
                    debug!(
                        "arp: request for {} from {} ({}), replying {tag}",
                        pkt.tpa, pkt.spa, pkt.sha
                    );
                    let reply = ArpPacket {
                        oper: ArpOperation::Reply,
                        sha: self.identity.mac(),
                        spa: pkt.tpa,
                        tha: pkt.sha,
                        tpa: pkt.spa,
                    };
                    // The requester's MAC is in hand; no resolution needed.
                    self.tx_arp(pkt.sha, &reply, tag);
                }
            }
            ArpOperation::Reply => {
                let source = if eth.dst.is_broadcast() {
                    LearnSource::GratuitousReply
                } else {
                    LearnSource::DirectReply
                };
                debug!("arp: reply {} -> {} ({source}) {tag}", pkt.spa, pkt.sha);
                self.learn(pkt.spa, pkt.sha, source);
            }
        }
    }

    /// Run a learning event through the cache and re-enqueue any frames it
    /// released, preserving their deferral order.
    fn learn(&self, ip: Ipv4Addr, mac: MacAddr, source: LearnSource) {
        match self.cache.learn(ip, mac, source, self.clock.now_ms()) {
            CacheAction::Flush(frames) => {
                for frame in frames {
                    if self.tx_ring.push(frame).is_err() {
                        debug!("arp: tx ring closed, dropping flushed frame");
                    }
                }
            }
            CacheAction::SendRequest(_) | CacheAction::None => {}
        }
    }

    // =========================================================================
    // IPv4
    // =========================================================================

    pub(crate) fn rx_ipv4(&self, eth: &EthernetFrame, tag: FrameTag) {
        let raw = &eth.payload;
        let pkt = match Ipv4Packet::parse(raw) {
            Ok(pkt) => pkt,
            Err(err) => {
                debug!("ipv4: drop {tag}: {err}");
                return;
            }
        };

        // Inbound reassembly is out of scope; fragments die here, silently.
        if pkt.is_fragment() {
            debug!("ipv4: inbound fragment {tag}, dropping");
            return;
        }

        if !self.identity.is_local_destination(pkt.dst) {
            debug!("ipv4: {} is not for us {tag}", pkt.dst);
            return;
        }

        match pkt.protocol {
            IpProtocol::Icmp => self.rx_icmpv4(&pkt, eth.src, tag),
            IpProtocol::Udp => self.rx_udp(&pkt, raw, eth.src, tag),
            IpProtocol::Tcp => self.rx_tcp(&pkt, eth.src, tag),
        }
    }

    // =========================================================================
    // ICMPv4
    // =========================================================================

    fn rx_icmpv4(&self, ip: &Ipv4Packet, src_mac: MacAddr, tag: FrameTag) {
        match Icmpv4Message::parse(&ip.payload) {
            Ok(Icmpv4Message::EchoRequest { id, seq, data }) => {
                debug!("icmpv4: echo request id={id:#06x} seq={seq} from {} {tag}", ip.src);
                let reply = Icmpv4Message::EchoReply { id, seq, data };
                self.tx_icmpv4(
                    self.reply_source(ip.dst),
                    ip.src,
                    &reply,
                    self.reply_mac(src_mac),
                    tag,
                );
            }
            Ok(_) => {
                // Echo replies and unreachables would matter to an ICMP
                // client; the core has none.
                debug!("icmpv4: ignoring message from {} {tag}", ip.src);
            }
            Err(err) => debug!("icmpv4: drop {tag}: {err}"),
        }
    }

    // =========================================================================
    // UDP
    // =========================================================================

    fn rx_udp(&self, ip: &Ipv4Packet, raw_l3: &[u8], src_mac: MacAddr, tag: FrameTag) {
        if !udp::verify_checksum(&ip.payload, ip.src, ip.dst) {
            debug!("udp: bad checksum {tag}");
            return;
        }
        let dgram = match UdpDatagram::parse(&ip.payload) {
            Ok(dgram) => dgram,
            Err(err) => {
                debug!("udp: drop {tag}: {err}");
                return;
            }
        };

        if let Some(socket) = self
            .udp_sockets
            .lookup(Endpoint::new(ip.dst, dgram.dst_port))
        {
            socket.deliver(Endpoint::new(ip.src, dgram.src_port), &dgram.payload, tag);
            return;
        }

        // Closed port.  An all-zero source cannot be answered.
        if ip.src.is_unspecified() {
            debug!("udp: closed port {} from unspecified source, dropping {tag}", dgram.dst_port);
            return;
        }

        debug!(
            "udp: no socket on {}:{}, sending port unreachable to {}:{} {tag}",
            ip.dst, dgram.dst_port, ip.src, dgram.src_port
        );
        // Quote the original IPv4 header plus the first 8 payload bytes.
        let ihl = ((raw_l3[0] & 0x0f) as usize) * 4;
        let end = (ihl + 8).min(raw_l3.len());
        let unreachable = Icmpv4Message::PortUnreachable {
            data: raw_l3[..end].to_vec(),
        };
        self.tx_icmpv4(
            self.reply_source(ip.dst),
            ip.src,
            &unreachable,
            self.reply_mac(src_mac),
            tag,
        );
    }

    // =========================================================================
    // TCP
    // =========================================================================

    fn rx_tcp(&self, ip: &Ipv4Packet, src_mac: MacAddr, tag: FrameTag) {
        if !tcp::verify_checksum(&ip.payload, ip.src, ip.dst) {
            debug!("tcp: bad checksum {tag}");
            return;
        }
        let seg = match TcpSegment::parse(&ip.payload) {
            Ok(seg) => seg,
            Err(err) => {
                debug!("tcp: drop {tag}: {err}");
                return;
            }
        };

        if let Some(listener) = self.tcp_sockets.lookup(Endpoint::new(ip.dst, seg.dst_port)) {
            listener.deliver(Endpoint::new(ip.src, seg.src_port), &seg, tag);
            return;
        }

        // No listener: anything but a reset earns a reset.  Never reset a
        // reset.
        if seg.flags.contains(TcpFlags::RST) {
            return;
        }

        let (seq, ack) = if seg.flags.contains(TcpFlags::ACK) {
            (seg.ack, seg.seq.wrapping_add(seg.payload.len() as u32))
        } else {
            let mut advance = seg.payload.len() as u32;
            if seg.flags.contains(TcpFlags::SYN) {
                advance = advance.wrapping_add(1);
            }
            if seg.flags.contains(TcpFlags::FIN) {
                advance = advance.wrapping_add(1);
            }
            (0, seg.seq.wrapping_add(advance))
        };

        debug!(
            "tcp: resetting {}:{} -> {}:{} {tag}",
            ip.src, seg.src_port, ip.dst, seg.dst_port
        );
        let rst = TcpSegment {
            src_port: seg.dst_port,
            dst_port: seg.src_port,
            seq,
            ack,
            flags: TcpFlags::RST | TcpFlags::ACK,
            window: 0,
            urgent: 0,
            options: Vec::new(),
            payload: Vec::new(),
        };
        self.tx_tcp(
            self.reply_source(ip.dst),
            ip.src,
            &rst,
            self.reply_mac(src_mac),
            tag,
        );
    }
}
