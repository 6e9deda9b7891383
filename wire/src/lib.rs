//! Wire-format types and codecs for the tapnet stack.
//!
//! Everything here is pure: parsers take untrusted byte slices and return
//! either a validated representation or a kind-tagged [`ParseError`];
//! emitters take typed fields and return bytes with checksums computed.
//! No I/O, no shared state, no suspension.
//!
//! Layer layout:
//!
//! - [`ethernet`] — Ethernet II framing
//! - [`arp`] — ARP, fixed to the IPv4-over-Ethernet variant
//! - [`ipv4`] — IPv4 with fragment fields
//! - [`icmpv4`] — echo request/reply and port-unreachable
//! - [`udp`] / [`tcp`] — transport codecs with pseudo-header checksums
//! - [`checksum`] — the shared ones-complement machinery
//! - [`types`] — address/port/protocol newtypes shared by every layer

pub mod arp;
pub mod checksum;
pub mod error;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;
pub mod tcp;
pub mod types;
pub mod udp;

pub use error::ParseError;
pub use types::{Endpoint, EtherType, IpProtocol, Ipv4Addr, MacAddr, Port};
