//! ARP packet codec, fixed to the IPv4-over-Ethernet variant (RFC 826).
//!
//! Any other hardware/protocol combination fails to parse; the stack never
//! emits one.

use crate::error::ParseError;
use crate::types::{Ipv4Addr, MacAddr};

/// Length of an IPv4-over-Ethernet ARP packet.
pub const PACKET_LEN: usize = 28;

pub const HTYPE_ETHERNET: u16 = 1;
pub const PTYPE_IPV4: u16 = 0x0800;
pub const HLEN_ETHERNET: u8 = 6;
pub const PLEN_IPV4: u8 = 4;

/// ARP operation field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOperation {
    Request = 1,
    Reply = 2,
}

impl ArpOperation {
    #[inline]
    pub const fn from_u16(val: u16) -> Option<Self> {
        match val {
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// A parsed (or to-be-emitted) ARP packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    pub oper: ArpOperation,
    /// Sender hardware address.
    pub sha: MacAddr,
    /// Sender protocol address.
    pub spa: Ipv4Addr,
    /// Target hardware address.
    pub tha: MacAddr,
    /// Target protocol address.
    pub tpa: Ipv4Addr,
}

impl ArpPacket {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < PACKET_LEN {
            return Err(ParseError::Truncated);
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let hlen = data[4];
        let plen = data[5];
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || hlen != HLEN_ETHERNET
            || plen != PLEN_IPV4
        {
            return Err(ParseError::UnsupportedArp);
        }

        let raw_oper = u16::from_be_bytes([data[6], data[7]]);
        let oper =
            ArpOperation::from_u16(raw_oper).ok_or(ParseError::UnknownArpOperation(raw_oper))?;

        Ok(Self {
            oper,
            sha: MacAddr([data[8], data[9], data[10], data[11], data[12], data[13]]),
            spa: Ipv4Addr([data[14], data[15], data[16], data[17]]),
            tha: MacAddr([data[18], data[19], data[20], data[21], data[22], data[23]]),
            tpa: Ipv4Addr([data[24], data[25], data[26], data[27]]),
        })
    }

    pub fn emit(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(PACKET_LEN);
        data.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        data.extend_from_slice(&PTYPE_IPV4.to_be_bytes());
        data.push(HLEN_ETHERNET);
        data.push(PLEN_IPV4);
        data.extend_from_slice(&self.oper.as_u16().to_be_bytes());
        data.extend_from_slice(&self.sha.0);
        data.extend_from_slice(&self.spa.0);
        data.extend_from_slice(&self.tha.0);
        data.extend_from_slice(&self.tpa.0);
        data
    }

    /// `true` for an ARP probe: a REQUEST with an unspecified sender
    /// protocol address, used for duplicate-address detection.
    #[inline]
    pub fn is_probe(&self) -> bool {
        self.oper == ArpOperation::Request && self.spa.is_unspecified()
    }

    /// `true` for a gratuitous announcement: sender and target protocol
    /// addresses equal.
    #[inline]
    pub fn is_announcement(&self) -> bool {
        self.spa == self.tpa && !self.spa.is_unspecified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArpPacket {
        ArpPacket {
            oper: ArpOperation::Request,
            sha: MacAddr([0x02, 0, 0, 0x77, 0x77, 0x77]),
            spa: Ipv4Addr([192, 168, 9, 7]),
            tha: MacAddr::ZERO,
            tpa: Ipv4Addr([192, 168, 9, 1]),
        }
    }

    #[test]
    fn round_trip() {
        let pkt = sample();
        let raw = pkt.emit();
        assert_eq!(raw.len(), PACKET_LEN);
        assert_eq!(ArpPacket::parse(&raw).unwrap(), pkt);
    }

    #[test]
    fn tolerates_ethernet_trailing_padding() {
        let mut raw = sample().emit();
        raw.extend_from_slice(&[0u8; 18]);
        assert_eq!(ArpPacket::parse(&raw).unwrap(), sample());
    }

    #[test]
    fn rejects_non_ethernet_ipv4() {
        let mut raw = sample().emit();
        raw[1] = 6; // htype = IEEE 802
        assert_eq!(ArpPacket::parse(&raw), Err(ParseError::UnsupportedArp));

        let mut raw = sample().emit();
        raw[7] = 3; // reverse ARP request
        assert_eq!(
            ArpPacket::parse(&raw),
            Err(ParseError::UnknownArpOperation(3))
        );

        assert_eq!(ArpPacket::parse(&[0u8; 27]), Err(ParseError::Truncated));
    }

    #[test]
    fn probe_and_announcement_shapes() {
        let mut probe = sample();
        probe.spa = Ipv4Addr::UNSPECIFIED;
        assert!(probe.is_probe());
        assert!(!probe.is_announcement());

        let mut gratuitous = sample();
        gratuitous.oper = ArpOperation::Reply;
        gratuitous.tpa = gratuitous.spa;
        assert!(gratuitous.is_announcement());
        assert!(!gratuitous.is_probe());
    }
}
