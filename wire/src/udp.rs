//! UDP datagram codec.

use crate::checksum;
use crate::error::ParseError;
use crate::types::{IpProtocol, Ipv4Addr, Port};

/// Length of the UDP header.
pub const HEADER_LEN: usize = 8;

/// A parsed (or to-be-emitted) UDP datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src_port: Port,
    pub dst_port: Port,
    pub payload: Vec<u8>,
}

impl UdpDatagram {
    /// Parse a datagram from the IPv4 payload.  The checksum is *not*
    /// validated here — it needs the pseudo-header; callers use
    /// [`verify_checksum`] with the addresses of the enclosing packet.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated);
        }
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        if length < HEADER_LEN || length > data.len() {
            return Err(ParseError::BadLength);
        }
        Ok(Self {
            src_port: Port::from_network_bytes([data[0], data[1]]),
            dst_port: Port::from_network_bytes([data[2], data[3]]),
            payload: data[HEADER_LEN..length].to_vec(),
        })
    }

    /// Serialize the datagram, computing the checksum over the
    /// pseudo-header for `src`/`dst`.  A computed checksum of zero is
    /// transmitted as `0xffff`, since zero on the wire means "no checksum".
    pub fn emit(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let length = (HEADER_LEN + self.payload.len()) as u16;
        let mut data = Vec::with_capacity(length as usize);
        data.extend_from_slice(&self.src_port.to_network_bytes());
        data.extend_from_slice(&self.dst_port.to_network_bytes());
        data.extend_from_slice(&length.to_be_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&self.payload);

        let mut cks = checksum::with_pseudo_header(src, dst, IpProtocol::Udp, &data);
        if cks == 0 {
            cks = 0xffff;
        }
        data[6..8].copy_from_slice(&cks.to_be_bytes());
        data
    }
}

/// Validate the checksum of a raw datagram against its pseudo-header.
///
/// A zero checksum field means the sender did not compute one; that is
/// accepted.  `data` must span exactly the bytes the length field covers.
pub fn verify_checksum(data: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> bool {
    if data.len() < HEADER_LEN {
        return false;
    }
    if data[6] == 0 && data[7] == 0 {
        return true;
    }
    checksum::fold(
        checksum::pseudo_header(src, dst, IpProtocol::Udp, data.len() as u16)
            .wrapping_add(checksum::sum(data)),
    ) == 0xffff
}
