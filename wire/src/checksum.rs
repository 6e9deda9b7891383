//! Internet ones-complement checksum (RFC 1071).
//!
//! Used by the IPv4 header, ICMPv4, UDP and TCP codecs.  UDP and TCP fold a
//! pseudo-header over the real addresses into the sum; the pseudo-header is
//! never transmitted on the wire.

use crate::types::{IpProtocol, Ipv4Addr};

/// Sum `data` as big-endian 16-bit words into a 32-bit accumulator.
///
/// An odd trailing byte is padded with a zero low byte.
pub fn sum(data: &[u8]) -> u32 {
    let mut acc = 0u32;
    let mut chunks = data.chunks_exact(2);
    for word in chunks.by_ref() {
        acc = acc.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let Some(&last) = chunks.remainder().first() {
        acc = acc.wrapping_add((last as u32) << 8);
    }
    acc
}

/// Fold the 32-bit accumulator down to 16 bits, wrapping carries back in.
pub fn fold(mut acc: u32) -> u16 {
    while acc >> 16 != 0 {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    acc as u16
}

/// Checksum of a self-contained byte range (IPv4 header, ICMPv4 message).
///
/// Computing this over a range that already contains its checksum yields 0
/// exactly when the checksum is valid.
pub fn of(data: &[u8]) -> u16 {
    !fold(sum(data))
}

/// Partial sum of the UDP/TCP pseudo-header
/// (src, dst, zero, protocol, upper-layer length).
pub fn pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, proto: IpProtocol, len: u16) -> u32 {
    sum(&src.0)
        .wrapping_add(sum(&dst.0))
        .wrapping_add(proto.as_u8() as u32)
        .wrapping_add(len as u32)
}

/// Checksum of an upper-layer message (UDP datagram or TCP segment) under
/// its pseudo-header.  `data` is the full header+payload with the checksum
/// field zeroed (when emitting) or in place (when verifying).
pub fn with_pseudo_header(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: IpProtocol,
    data: &[u8],
) -> u16 {
    !fold(pseudo_header(src, dst, proto, data.len() as u16).wrapping_add(sum(data)))
}
