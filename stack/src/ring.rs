//! RX/TX rings — the bounded queues that decouple the transport from the
//! pipeline.
//!
//! One generic [`Ring`] serves both directions.  Producers block while the
//! ring is full (no frame is ever dropped on overflow); consumers block
//! while it is empty.  `close()` is the cooperative-shutdown hook: it wakes
//! every waiter, after which `pop` drains what is left and then returns
//! `None`, and `push` hands the frame back.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, PoisonError};

use tapnet_wire::ethernet::EthernetFrame;
use tapnet_wire::ipv4;
use tapnet_wire::{EtherType, Ipv4Addr};

/// Default capacity of the RX and TX rings.
pub const DEFAULT_RING_CAPACITY: usize = 256;

// =============================================================================
// Frame tags and ring items
// =============================================================================

/// Diagnostic tag attached to every frame: a monotonically increasing
/// serial and a receive timestamp.  Reply frames copy the tag of their
/// request; originated frames get a fresh one via [`FrameTag::origin`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTag {
    pub serial: u64,
    pub received_ms: u64,
}

impl FrameTag {
    pub const fn new(serial: u64, received_ms: u64) -> Self {
        Self {
            serial,
            received_ms,
        }
    }

    /// Tag for traffic the stack originates itself (probes, announcements,
    /// user datagrams).
    pub const fn origin(now_ms: u64) -> Self {
        Self {
            serial: 0,
            received_ms: now_ms,
        }
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}ms", self.serial, self.received_ms)
    }
}

/// A received Ethernet frame with its diagnostic tag.
#[derive(Clone, Debug)]
pub struct RxFrame {
    pub frame: EthernetFrame,
    pub tag: FrameTag,
}

/// A fully-formed outbound Ethernet frame awaiting emission.
///
/// A zero destination MAC is the "resolve via ARP" sentinel: the egress
/// thread looks up the destination of the inner IPv4 header and fills the
/// MAC in (or defers the frame on the cache's pending queue).
#[derive(Clone, Debug)]
pub struct TxFrame {
    pub frame: EthernetFrame,
    pub tag: FrameTag,
}

impl TxFrame {
    /// `true` if the destination MAC is the resolve-via-ARP sentinel.
    #[inline]
    pub fn needs_resolution(&self) -> bool {
        self.frame.dst.is_zero()
    }

    /// Destination of the inner IPv4 header, if the frame carries one.
    pub fn inner_ipv4_dst(&self) -> Option<Ipv4Addr> {
        if self.frame.ethertype != EtherType::Ipv4 {
            return None;
        }
        let p = &self.frame.payload;
        if p.len() < ipv4::HEADER_LEN {
            return None;
        }
        Some(Ipv4Addr([p[16], p[17], p[18], p[19]]))
    }
}

// =============================================================================
// Ring
// =============================================================================

struct RingInner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// Thread-safe bounded FIFO shared by one side of the transport and the
/// pipeline.
pub struct Ring<T> {
    inner: Mutex<RingInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

pub type RxRing = Ring<RxFrame>;
pub type TxRing = Ring<TxFrame>;

impl<T> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be nonzero");
        Self {
            inner: Mutex::new(RingInner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append an item, blocking while the ring is full.
    ///
    /// Returns the item back if the ring has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        while inner.queue.len() >= self.capacity && !inner.closed {
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.closed {
            return Err(item);
        }
        inner.queue.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the ring is empty.
    ///
    /// Returns `None` once the ring is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(item) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the ring and wake every waiter.  Items already queued can
    /// still be popped.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take everything currently queued without blocking.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let drained = inner.queue.drain(..).collect();
        self.not_full.notify_all();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let ring: Ring<u32> = Ring::new(8);
        for v in 0..5 {
            ring.push(v).unwrap();
        }
        assert_eq!(ring.len(), 5);
        for v in 0..5 {
            assert_eq!(ring.pop(), Some(v));
        }
    }

    #[test]
    fn close_drains_then_ends() {
        let ring: Ring<u32> = Ring::new(8);
        ring.push(1).unwrap();
        ring.close();
        assert_eq!(ring.push(2), Err(2));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn full_ring_blocks_producer_until_consumed() {
        let ring: Arc<Ring<u32>> = Arc::new(Ring::new(1));
        ring.push(0).unwrap();

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                ring.pop()
            })
        };

        // Blocks until the consumer makes room.
        ring.push(1).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(0));
        assert_eq!(ring.pop(), Some(1));
    }

    #[test]
    fn inner_ipv4_dst_requires_ipv4_payload() {
        let arp_frame = TxFrame {
            frame: EthernetFrame::new(
                tapnet_wire::MacAddr::ZERO,
                tapnet_wire::MacAddr([2, 0, 0, 0x77, 0x77, 0x77]),
                EtherType::Arp,
                vec![0; 28],
            ),
            tag: FrameTag::origin(0),
        };
        assert!(arp_frame.needs_resolution());
        assert_eq!(arp_frame.inner_ipv4_dst(), None);
    }
}
