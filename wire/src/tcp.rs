//! TCP segment codec.
//!
//! The stack holds no TCP connection state; it parses inbound segments and
//! constructs RST+ACK replies.  The codec is nonetheless complete in both
//! directions so that the reply path and the tests share one
//! representation.

use bitflags::bitflags;

use crate::checksum;
use crate::error::ParseError;
use crate::types::{IpProtocol, Ipv4Addr, Port};

/// Length of the option-less TCP header.
pub const HEADER_LEN: usize = 20;

bitflags! {
    /// TCP control flags (low 6 bits of byte 13).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

/// A parsed (or to-be-emitted) TCP segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_port: Port,
    pub dst_port: Port,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub urgent: u16,
    /// Raw option bytes; zero-padded to a 4-byte multiple on emission.
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated);
        }

        let data_offset = data[12] >> 4;
        if data_offset < 5 {
            return Err(ParseError::BadDataOffset(data_offset));
        }
        let header_len = data_offset as usize * 4;
        if data.len() < header_len {
            return Err(ParseError::BadLength);
        }

        Ok(Self {
            src_port: Port::from_network_bytes([data[0], data[1]]),
            dst_port: Port::from_network_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            flags: TcpFlags::from_bits_truncate(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            urgent: u16::from_be_bytes([data[18], data[19]]),
            options: data[HEADER_LEN..header_len].to_vec(),
            payload: data[header_len..].to_vec(),
        })
    }

    /// Serialize the segment, computing the checksum over the pseudo-header
    /// for `src`/`dst` (protocol 6).
    pub fn emit(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let options_len = self.options.len().div_ceil(4) * 4;
        let header_len = HEADER_LEN + options_len;
        let data_offset = (header_len / 4) as u8;

        let mut data = Vec::with_capacity(header_len + self.payload.len());
        data.extend_from_slice(&self.src_port.to_network_bytes());
        data.extend_from_slice(&self.dst_port.to_network_bytes());
        data.extend_from_slice(&self.seq.to_be_bytes());
        data.extend_from_slice(&self.ack.to_be_bytes());
        data.push(data_offset << 4);
        data.push(self.flags.bits());
        data.extend_from_slice(&self.window.to_be_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&self.urgent.to_be_bytes());
        data.extend_from_slice(&self.options);
        data.resize(header_len, 0);
        data.extend_from_slice(&self.payload);

        let cks = checksum::with_pseudo_header(src, dst, IpProtocol::Tcp, &data);
        data[16..18].copy_from_slice(&cks.to_be_bytes());
        data
    }
}

/// Validate the checksum of a raw segment against its pseudo-header.
pub fn verify_checksum(data: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> bool {
    checksum::fold(
        checksum::pseudo_header(src, dst, IpProtocol::Tcp, data.len() as u16)
            .wrapping_add(checksum::sum(data)),
    ) == 0xffff
}
