//! ICMPv4 message codec.
//!
//! Only the three shapes the stack handles are representable: echo request,
//! echo reply, and port-unreachable.  Everything else parses to
//! [`ParseError::UnsupportedIcmp`] and is dropped by the dispatcher.

use crate::checksum;
use crate::error::ParseError;

/// Length of the ICMPv4 header (type, code, checksum, rest-of-header).
pub const HEADER_LEN: usize = 8;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const CODE_PORT_UNREACHABLE: u8 = 3;

/// A parsed (or to-be-emitted) ICMPv4 message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Icmpv4Message {
    EchoRequest { id: u16, seq: u16, data: Vec<u8> },
    EchoReply { id: u16, seq: u16, data: Vec<u8> },
    /// Destination unreachable, code 3 (port).  `data` carries the original
    /// IPv4 header plus the first eight payload bytes.
    PortUnreachable { data: Vec<u8> },
}

impl Icmpv4Message {
    /// Parse and checksum-verify a message from the IPv4 payload.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated);
        }
        if checksum::of(data) != 0 {
            return Err(ParseError::BadChecksum);
        }

        let ty = data[0];
        let code = data[1];
        let rest = &data[HEADER_LEN..];
        match (ty, code) {
            (TYPE_ECHO_REQUEST, 0) => Ok(Self::EchoRequest {
                id: u16::from_be_bytes([data[4], data[5]]),
                seq: u16::from_be_bytes([data[6], data[7]]),
                data: rest.to_vec(),
            }),
            (TYPE_ECHO_REPLY, 0) => Ok(Self::EchoReply {
                id: u16::from_be_bytes([data[4], data[5]]),
                seq: u16::from_be_bytes([data[6], data[7]]),
                data: rest.to_vec(),
            }),
            (TYPE_DEST_UNREACHABLE, CODE_PORT_UNREACHABLE) => Ok(Self::PortUnreachable {
                data: rest.to_vec(),
            }),
            _ => Err(ParseError::UnsupportedIcmp { ty, code }),
        }
    }

    /// Serialize the message, computing the checksum over the whole of it.
    pub fn emit(&self) -> Vec<u8> {
        let (ty, code, rest_of_header, body): (u8, u8, [u8; 4], &[u8]) = match self {
            Self::EchoRequest { id, seq, data } => {
                (TYPE_ECHO_REQUEST, 0, echo_header(*id, *seq), data.as_slice())
            }
            Self::EchoReply { id, seq, data } => {
                (TYPE_ECHO_REPLY, 0, echo_header(*id, *seq), data.as_slice())
            }
            Self::PortUnreachable { data } => {
                (TYPE_DEST_UNREACHABLE, CODE_PORT_UNREACHABLE, [0; 4], data.as_slice())
            }
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(ty);
        out.push(code);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&rest_of_header);
        out.extend_from_slice(body);
        let cks = checksum::of(&out);
        out[2..4].copy_from_slice(&cks.to_be_bytes());
        out
    }
}

fn echo_header(id: u16, seq: u16) -> [u8; 4] {
    let id = id.to_be_bytes();
    let seq = seq.to_be_bytes();
    [id[0], id[1], seq[0], seq[1]]
}
