//! TX composition: build nested headers bottom-up, fragment at the MTU
//! boundary, and enqueue finished frames on the TX ring.
//!
//! Upper-layer checksums (UDP/TCP) are computed by the codecs over the
//! whole datagram with the pseudo-header *before* fragmentation, so a
//! fragmented datagram carries its checksum in the first fragment only.

use std::sync::atomic::Ordering;

use log::debug;
use tapnet_wire::arp::ArpPacket;
use tapnet_wire::ethernet::EthernetFrame;
use tapnet_wire::icmpv4::Icmpv4Message;
use tapnet_wire::ipv4::{self, Ipv4Packet};
use tapnet_wire::tcp::TcpSegment;
use tapnet_wire::udp::UdpDatagram;
use tapnet_wire::{EtherType, IpProtocol, Ipv4Addr, MacAddr, Port};

use super::PacketHandler;
use crate::ring::{FrameTag, TxFrame};

impl PacketHandler {
    /// Preferred source address for a reply: the address the request was
    /// sent to, when we actually claimed it (a broadcast destination is
    /// nobody's source).
    pub(crate) fn reply_source(&self, local: Ipv4Addr) -> Option<Ipv4Addr> {
        if self.identity.is_claimed(local) {
            Some(local)
        } else {
            None
        }
    }

    /// Wrap an ARP packet in an Ethernet frame and enqueue it.  ARP frames
    /// always know their link-layer destination.
    pub fn tx_arp(&self, dst_mac: MacAddr, pkt: &ArpPacket, tag: FrameTag) {
        self.tx_ethernet(dst_mac, EtherType::Arp, pkt.emit(), tag);
    }

    /// Compose and send an ICMPv4 message.
    pub fn tx_icmpv4(
        &self,
        src: Option<Ipv4Addr>,
        dst: Ipv4Addr,
        msg: &Icmpv4Message,
        dst_mac: Option<MacAddr>,
        tag: FrameTag,
    ) {
        let Some(src) = self.source_ip(src) else {
            debug!("icmpv4: no claimed source address, dropping {tag}");
            return;
        };
        self.tx_ipv4(src, dst, IpProtocol::Icmp, msg.emit(), dst_mac, tag);
    }

    /// Compose and send a UDP datagram — the entry point for originated
    /// traffic from higher layers.
    #[allow(clippy::too_many_arguments)]
    pub fn tx_udp(
        &self,
        src: Option<Ipv4Addr>,
        dst: Ipv4Addr,
        src_port: Port,
        dst_port: Port,
        payload: &[u8],
        dst_mac: Option<MacAddr>,
        tag: FrameTag,
    ) {
        let Some(src) = self.source_ip(src) else {
            debug!("udp: no claimed source address, dropping {tag}");
            return;
        };
        let dgram = UdpDatagram {
            src_port,
            dst_port,
            payload: payload.to_vec(),
        };
        self.tx_ipv4(src, dst, IpProtocol::Udp, dgram.emit(src, dst), dst_mac, tag);
    }

    /// Compose and send a TCP segment (the RST path; the core initiates no
    /// connections).
    pub fn tx_tcp(
        &self,
        src: Option<Ipv4Addr>,
        dst: Ipv4Addr,
        seg: &TcpSegment,
        dst_mac: Option<MacAddr>,
        tag: FrameTag,
    ) {
        let Some(src) = self.source_ip(src) else {
            debug!("tcp: no claimed source address, dropping {tag}");
            return;
        };
        self.tx_ipv4(src, dst, IpProtocol::Tcp, seg.emit(src, dst), dst_mac, tag);
    }

    fn source_ip(&self, preferred: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
        preferred.or_else(|| self.identity.first_claimed())
    }

    // =========================================================================
    // IPv4 composition and fragmentation
    // =========================================================================

    fn tx_ipv4(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: IpProtocol,
        payload: Vec<u8>,
        dst_mac: Option<MacAddr>,
        tag: FrameTag,
    ) {
        let eth_dst = dst_mac.unwrap_or(MacAddr::ZERO);

        if ipv4::HEADER_LEN + payload.len() <= self.mtu {
            let pkt = Ipv4Packet {
                tos: 0,
                id: self.ip_id.fetch_add(1, Ordering::Relaxed),
                dont_fragment: false,
                more_fragments: false,
                frag_offset: 0,
                ttl: ipv4::DEFAULT_TTL,
                protocol,
                src,
                dst,
                payload,
            };
            self.tx_ethernet(eth_dst, EtherType::Ipv4, pkt.emit(), tag);
            return;
        }

        // Per-fragment payload capacity, kept 8-byte aligned.
        let capacity = (self.mtu - ipv4::HEADER_LEN) & !7;
        // One random id shared by the whole fragment set.
        let id: u16 = rand::random();
        debug!(
            "ipv4: fragmenting {} byte {protocol} datagram to {dst} (id={id:#06x}) {tag}",
            payload.len()
        );

        let total = payload.len();
        let mut start = 0usize;
        while start < total {
            let end = (start + capacity).min(total);
            let pkt = Ipv4Packet {
                tos: 0,
                id,
                dont_fragment: false,
                more_fragments: end < total,
                frag_offset: (start / 8) as u16,
                ttl: ipv4::DEFAULT_TTL,
                protocol,
                src,
                dst,
                payload: payload[start..end].to_vec(),
            };
            self.tx_ethernet(eth_dst, EtherType::Ipv4, pkt.emit(), tag);
            start = end;
        }
    }

    fn tx_ethernet(&self, dst: MacAddr, ethertype: EtherType, payload: Vec<u8>, tag: FrameTag) {
        let frame = EthernetFrame::new(dst, self.identity.mac(), ethertype, payload);
        if self.tx_ring.push(TxFrame { frame, tag }).is_err() {
            debug!("ether: tx ring closed, dropping frame {tag}");
        }
    }
}
