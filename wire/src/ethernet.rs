//! Ethernet II frame codec.

use crate::error::ParseError;
use crate::types::{EtherType, MacAddr};

/// Length of the Ethernet header (dst + src + ethertype).
pub const HEADER_LEN: usize = 14;

/// A parsed (or to-be-emitted) Ethernet II frame.
///
/// `payload` holds everything after the 14-byte header.  Emission does not
/// pad to the 46-byte wire minimum; the TAP transport accepts short frames
/// and inner layers trim trailing padding by their own length fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: EtherType,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: EtherType, payload: Vec<u8>) -> Self {
        Self {
            dst,
            src,
            ethertype,
            payload,
        }
    }

    /// Parse a raw frame as read from the transport.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated);
        }
        let dst = MacAddr([data[0], data[1], data[2], data[3], data[4], data[5]]);
        let src = MacAddr([data[6], data[7], data[8], data[9], data[10], data[11]]);
        let raw_type = u16::from_be_bytes([data[12], data[13]]);
        let ethertype =
            EtherType::from_u16(raw_type).ok_or(ParseError::UnknownEtherType(raw_type))?;
        Ok(Self {
            dst,
            src,
            ethertype,
            payload: data[HEADER_LEN..].to_vec(),
        })
    }

    /// Serialize header + payload into a wire buffer.
    pub fn emit(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len());
        frame.extend_from_slice(&self.dst.0);
        frame.extend_from_slice(&self.src.0);
        frame.extend_from_slice(&self.ethertype.as_u16().to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}
