//! Stack identity: the configured MAC and the candidate → claimed address
//! lifecycle.
//!
//! Candidates exist only during the startup probe window.  [`promote`]
//! freezes the surviving addresses and the broadcast set; after that the
//! claimed set is immutable for the lifetime of the process and freely
//! readable from every thread.
//!
//! [`promote`]: StackIdentity::promote

use std::sync::{PoisonError, RwLock};

use log::{debug, warn};
use tapnet_wire::{Ipv4Addr, MacAddr};

use crate::config::Candidate;

/// An address that survived duplicate-address detection, with its mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClaimedAddr {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
}

/// The frozen post-claim address set.
#[derive(Clone, Debug, Default)]
pub struct ClaimedSet {
    addrs: Vec<ClaimedAddr>,
    /// `255.255.255.255` plus the directed broadcast of every claimed
    /// subnet.
    broadcast: Vec<Ipv4Addr>,
}

enum State {
    Probing {
        candidates: Vec<Candidate>,
        conflicted: Vec<Ipv4Addr>,
    },
    Claimed(ClaimedSet),
}

/// Who the stack is on the wire.
pub struct StackIdentity {
    mac: MacAddr,
    state: RwLock<State>,
}

impl StackIdentity {
    pub fn new(mac: MacAddr, candidates: Vec<Candidate>) -> Self {
        Self {
            mac,
            state: RwLock::new(State::Probing {
                candidates,
                conflicted: Vec::new(),
            }),
        }
    }

    #[inline]
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Record an observed ARP sender pair.  During the probe window, any
    /// ARP packet claiming a candidate address from a foreign MAC marks
    /// that candidate as conflicting.
    pub fn note_arp_seen(&self, spa: Ipv4Addr, sha: MacAddr) {
        if sha == self.mac || spa.is_unspecified() {
            return;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let State::Probing {
            candidates,
            conflicted,
        } = &mut *state
            && candidates.iter().any(|c| c.addr == spa)
            && !conflicted.contains(&spa)
        {
            warn!("claim: conflict for {spa} ({sha} answered during probe)");
            conflicted.push(spa);
        }
    }

    /// Candidates still worth probing (not yet marked conflicting).
    /// Empty once promoted.
    pub fn probing_candidates(&self) -> Vec<Ipv4Addr> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Probing {
                candidates,
                conflicted,
            } => candidates
                .iter()
                .map(|c| c.addr)
                .filter(|a| !conflicted.contains(a))
                .collect(),
            State::Claimed(_) => Vec::new(),
        }
    }

    /// End the probe window: conflict-free candidates become claimed, the
    /// broadcast set is computed, and the state is frozen.
    ///
    /// Returns the claimed and conflicted addresses.  Idempotent: a second
    /// call returns the frozen claimed set and no conflicts.
    pub fn promote(&self) -> (Vec<Ipv4Addr>, Vec<Ipv4Addr>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let (candidates, conflicted) = match &mut *state {
            State::Probing {
                candidates,
                conflicted,
            } => (std::mem::take(candidates), std::mem::take(conflicted)),
            State::Claimed(set) => {
                return (set.addrs.iter().map(|a| a.addr).collect(), Vec::new());
            }
        };

        let mut set = ClaimedSet {
            addrs: Vec::new(),
            broadcast: vec![Ipv4Addr::BROADCAST],
        };
        for cand in &candidates {
            if conflicted.contains(&cand.addr) {
                continue;
            }
            set.addrs.push(ClaimedAddr {
                addr: cand.addr,
                mask: cand.mask,
            });
            let directed = cand.addr.directed_broadcast(cand.mask);
            if !set.broadcast.contains(&directed) {
                set.broadcast.push(directed);
            }
        }
        let claimed: Vec<Ipv4Addr> = set.addrs.iter().map(|a| a.addr).collect();
        debug!(
            "claim: promoted {} of {} candidates",
            claimed.len(),
            candidates.len()
        );
        *state = State::Claimed(set);
        (claimed, conflicted)
    }

    /// `true` once `ip` has passed duplicate-address detection.
    pub fn is_claimed(&self, ip: Ipv4Addr) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Claimed(set) => set.addrs.iter().any(|a| a.addr == ip),
            State::Probing { .. } => false,
        }
    }

    /// `true` if an inbound IPv4 packet addressed to `ip` is for us:
    /// claimed addresses plus the broadcast set.
    pub fn is_local_destination(&self, ip: Ipv4Addr) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Claimed(set) => {
                set.addrs.iter().any(|a| a.addr == ip) || set.broadcast.contains(&ip)
            }
            State::Probing { .. } => false,
        }
    }

    /// `true` if `ip` is a broadcast destination (limited or directed);
    /// such frames skip ARP resolution on TX.
    pub fn is_broadcast_destination(&self, ip: Ipv4Addr) -> bool {
        if ip.is_broadcast() {
            return true;
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Claimed(set) => set.broadcast.contains(&ip),
            State::Probing { .. } => false,
        }
    }

    /// The first claimed address — the source used for originated traffic.
    pub fn first_claimed(&self) -> Option<Ipv4Addr> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Claimed(set) => set.addrs.first().map(|a| a.addr),
            State::Probing { .. } => None,
        }
    }

    /// The frozen broadcast set (diagnostics and logging).
    pub fn broadcast_set(&self) -> Vec<Ipv4Addr> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Claimed(set) => set.broadcast.clone(),
            State::Probing { .. } => Vec::new(),
        }
    }
}
