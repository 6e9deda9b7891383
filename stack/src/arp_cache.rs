//! ARP cache with resolution-on-miss, learning policy, and timer-driven
//! sweeping.
//!
//! # Concurrency
//!
//! All mutable state sits behind a single mutex.  Mutating methods take the
//! current time as a parameter, collect any I/O the caller must perform,
//! release the lock, and return the work as a [`CacheAction`].  The caller
//! (RX handler or egress thread) executes the action *outside* the lock,
//! which keeps the lock ordering trivial: nothing is ever transmitted while
//! the cache is held.
//!
//! # Invariants
//!
//! - At most one entry per IPv4 address; an accepted update replaces the MAC
//!   and refreshes the timestamp.
//! - A pending queue exists only for an address *without* a fresh entry;
//!   learning an address flushes and removes its queue.
//! - Flushed frames come back in the order they were deferred.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use log::debug;
use tapnet_wire::{Ipv4Addr, MacAddr};

use crate::config::ArpPolicy;
use crate::ring::TxFrame;

/// How long a resolved entry stays fresh.
pub const ENTRY_TTL_MS: u64 = 60_000;

/// How long a deferred frame waits for resolution before it is dropped.
pub const RESOLVE_TIMEOUT_MS: u64 = 3_000;

/// Where a learning event came from; the policy flags accept or reject
/// updates per source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LearnSource {
    /// Sender fields of an ARP request addressed to us.
    DirectRequest,
    /// An ARP reply unicast to our MAC.
    DirectReply,
    /// An ARP reply sent to the broadcast address.
    GratuitousReply,
}

impl fmt::Display for LearnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectRequest => write!(f, "direct request"),
            Self::DirectReply => write!(f, "direct reply"),
            Self::GratuitousReply => write!(f, "gratuitous reply"),
        }
    }
}

/// I/O the caller must perform after a cache call returns.
pub enum CacheAction {
    /// Broadcast one ARP request for this address.
    SendRequest(Ipv4Addr),
    /// Frames whose next hop just resolved.  Destination MACs are already
    /// filled in; transmit in order.
    Flush(Vec<TxFrame>),
    None,
}

/// Outcome of [`ArpCache::resolve`].
pub enum ResolveOutcome {
    /// The MAC was known and has been written into the frame.
    Resolved(TxFrame),
    /// The frame was deferred onto the pending queue.  When `send_request`
    /// is set this was the first waiter and the caller must broadcast an
    /// ARP request.
    Queued { send_request: bool },
}

struct Entry {
    mac: MacAddr,
    refreshed_ms: u64,
}

struct Waiter {
    frame: TxFrame,
    deferred_ms: u64,
}

struct CacheInner {
    entries: HashMap<Ipv4Addr, Entry>,
    pending: HashMap<Ipv4Addr, VecDeque<Waiter>>,
}

/// The address-resolution table shared by the RX handler, egress thread
/// and sweep timer.
pub struct ArpCache {
    inner: Mutex<CacheInner>,
    policy: ArpPolicy,
}

impl ArpCache {
    pub fn new(policy: ArpPolicy) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                pending: HashMap::new(),
            }),
            policy,
        }
    }

    /// Resolve the next-hop MAC for a sentinel-MAC frame.
    ///
    /// On a fresh entry the destination MAC is filled in and the frame
    /// handed back.  Otherwise the frame is deferred in FIFO order and the
    /// caller is told whether to issue the (single) broadcast request.
    pub fn resolve(&self, ip: Ipv4Addr, mut frame: TxFrame, now_ms: u64) -> ResolveOutcome {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let hit = inner
            .entries
            .get(&ip)
            .map(|entry| (entry.mac, entry.refreshed_ms));
        if let Some((mac, refreshed_ms)) = hit {
            if now_ms.saturating_sub(refreshed_ms) <= ENTRY_TTL_MS {
                frame.frame.dst = mac;
                return ResolveOutcome::Resolved(frame);
            }
            // Expired while idle; fall through to the miss path.
            inner.entries.remove(&ip);
            debug!("arp: entry for {ip} expired");
        }

        let queue = inner.pending.entry(ip).or_default();
        let first_waiter = queue.is_empty();
        queue.push_back(Waiter {
            frame,
            deferred_ms: now_ms,
        });
        ResolveOutcome::Queued {
            send_request: first_waiter,
        }
    }

    /// Insert or refresh an entry, subject to the learning policy.
    ///
    /// Returns a [`CacheAction::Flush`] with any frames that were waiting
    /// on this address, in the order they were deferred.
    pub fn learn(
        &self,
        ip: Ipv4Addr,
        mac: MacAddr,
        source: LearnSource,
        now_ms: u64,
    ) -> CacheAction {
        let accepted = match source {
            LearnSource::DirectReply => true,
            LearnSource::DirectRequest => {
                self.policy.contains(ArpPolicy::UPDATE_FROM_DIRECT_REQUEST)
            }
            LearnSource::GratuitousReply => {
                self.policy.contains(ArpPolicy::UPDATE_FROM_GRATUITOUS)
            }
        };
        if !accepted {
            debug!("arp: ignoring {source} update for {ip} per policy");
            return CacheAction::None;
        }

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.insert(
            ip,
            Entry {
                mac,
                refreshed_ms: now_ms,
            },
        );
        debug!("arp: learned {ip} -> {mac} ({source})");

        match inner.pending.remove(&ip) {
            Some(queue) if !queue.is_empty() => {
                let frames = queue
                    .into_iter()
                    .map(|mut waiter| {
                        waiter.frame.frame.dst = mac;
                        waiter.frame
                    })
                    .collect::<Vec<_>>();
                debug!("arp: flushing {} deferred frames for {ip}", frames.len());
                CacheAction::Flush(frames)
            }
            _ => CacheAction::None,
        }
    }

    /// Evict entries older than the TTL and return deferred frames whose
    /// wait exceeded the resolution timeout, for the caller to drop.
    pub fn sweep(&self, now_ms: u64) -> Vec<TxFrame> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        inner.entries.retain(|ip, entry| {
            let fresh = now_ms.saturating_sub(entry.refreshed_ms) <= ENTRY_TTL_MS;
            if !fresh {
                debug!("arp: sweeping expired entry for {ip}");
            }
            fresh
        });

        let mut dropped = Vec::new();
        inner.pending.retain(|_, queue| {
            while let Some(waiter) = queue.front() {
                if now_ms.saturating_sub(waiter.deferred_ms) <= RESOLVE_TIMEOUT_MS {
                    break;
                }
                if let Some(waiter) = queue.pop_front() {
                    dropped.push(waiter.frame);
                }
            }
            !queue.is_empty()
        });
        dropped
    }

    /// Number of resolved entries (diagnostic).
    pub fn entry_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}
