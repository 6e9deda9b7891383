//! Socket registries — the collaborator boundary above the pipeline.
//!
//! The core consumes two read-mostly maps keyed by local endpoint.  Lookup
//! tries the exact `(ip, port)` key first, then the wildcard
//! `(0.0.0.0, port)` key.  Registration and removal belong to the
//! collaborators that own the sockets; the RX path only reads.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tapnet_wire::tcp::TcpSegment;
use tapnet_wire::{Endpoint, Ipv4Addr};

use crate::ring::FrameTag;

/// A bound UDP consumer.
pub trait UdpSocket: Send + Sync {
    /// Hand over one datagram's payload.  Must not block the RX thread.
    fn deliver(&self, src: Endpoint, payload: &[u8], tag: FrameTag);
}

/// A TCP listener collaborator.  The core owns no connection state; a
/// listener gets the raw segment and does with it what it will.
pub trait TcpListener: Send + Sync {
    fn deliver(&self, src: Endpoint, segment: &TcpSegment, tag: FrameTag);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryError {
    AddressInUse(Endpoint),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressInUse(ep) => write!(f, "address {ep} already in use"),
        }
    }
}

impl std::error::Error for RegistryError {}

macro_rules! registry {
    ($name:ident, $socket:ident, $doc:literal) => {
        #[doc = $doc]
        pub struct $name {
            sockets: RwLock<HashMap<Endpoint, Arc<dyn $socket>>>,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    sockets: RwLock::new(HashMap::new()),
                }
            }

            pub fn register(
                &self,
                local: Endpoint,
                socket: Arc<dyn $socket>,
            ) -> Result<(), RegistryError> {
                let mut sockets = self
                    .sockets
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                if sockets.contains_key(&local) {
                    return Err(RegistryError::AddressInUse(local));
                }
                sockets.insert(local, socket);
                Ok(())
            }

            pub fn unregister(&self, local: Endpoint) {
                self.sockets
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&local);
            }

            /// Exact match first, wildcard-address match second.
            pub fn lookup(&self, dst: Endpoint) -> Option<Arc<dyn $socket>> {
                let sockets = self.sockets.read().unwrap_or_else(PoisonError::into_inner);
                sockets
                    .get(&dst)
                    .or_else(|| {
                        sockets.get(&Endpoint::new(Ipv4Addr::UNSPECIFIED, dst.port))
                    })
                    .cloned()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

registry!(UdpRegistry, UdpSocket, "Listening UDP sockets by local endpoint.");
registry!(TcpRegistry, TcpListener, "Listening TCP sockets by local endpoint.");
