//! Codec error type.
//!
//! Every parser returns a kind-tagged `ParseError` instead of panicking or
//! truncating; the RX dispatch matches on the kind, logs, and drops.

use core::fmt;

/// Reason a byte buffer failed to parse as a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is shorter than the fixed header of the layer.
    Truncated,
    /// A length field disagrees with the buffer (too short, or shorter than
    /// the header it must cover).
    BadLength,
    /// A checksum did not verify.
    BadChecksum,
    /// IPv4 version field is not 4.
    UnsupportedVersion(u8),
    /// EtherType the stack does not handle.
    UnknownEtherType(u16),
    /// IP protocol number the stack does not handle.
    UnknownProtocol(u8),
    /// ARP hardware/protocol format other than Ethernet/IPv4.
    UnsupportedArp,
    /// ARP operation other than REQUEST or REPLY.
    UnknownArpOperation(u16),
    /// ICMPv4 type/code combination the stack does not handle.
    UnsupportedIcmp { ty: u8, code: u8 },
    /// TCP data offset outside the 5..=15 word range.
    BadDataOffset(u8),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated packet"),
            Self::BadLength => write!(f, "length field disagrees with buffer"),
            Self::BadChecksum => write!(f, "bad checksum"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported IP version {v}"),
            Self::UnknownEtherType(t) => write!(f, "unknown ethertype 0x{t:04x}"),
            Self::UnknownProtocol(p) => write!(f, "unknown IP protocol {p}"),
            Self::UnsupportedArp => write!(f, "ARP format is not Ethernet/IPv4"),
            Self::UnknownArpOperation(o) => write!(f, "unknown ARP operation {o}"),
            Self::UnsupportedIcmp { ty, code } => {
                write!(f, "unsupported ICMP type {ty} code {code}")
            }
            Self::BadDataOffset(off) => write!(f, "bad TCP data offset {off}"),
        }
    }
}

impl std::error::Error for ParseError {}
