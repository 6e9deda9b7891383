//! Startup configuration and validation.
//!
//! The configuration is read once, validated before any thread starts, and
//! never mutated afterwards.  Validation failures are descriptive and fatal:
//! the process exits non-zero without touching the transport.

use core::fmt;
use core::str::FromStr;

use bitflags::bitflags;
use tapnet_wire::{Ipv4Addr, MacAddr};

/// Default TAP interface name.
pub const DEFAULT_INTERFACE: &str = "tap7";
/// Default stack MAC address.
pub const DEFAULT_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x77, 0x77, 0x77]);
/// Default interface MTU.
pub const DEFAULT_MTU: usize = 1500;

/// Smallest MTU the stack accepts (the IPv4 minimum).
pub const MTU_MIN: usize = 68;
/// Largest MTU the stack accepts (jumbo frames).
pub const MTU_MAX: usize = 9216;

bitflags! {
    /// ARP learning and TX policy knobs.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ArpPolicy: u8 {
        /// Refresh cache entries from the sender fields of ARP requests
        /// addressed to us.
        const UPDATE_FROM_DIRECT_REQUEST = 0b0001;
        /// Refresh cache entries from gratuitous (broadcast) ARP replies.
        const UPDATE_FROM_GRATUITOUS = 0b0010;
        /// Reply frames carry the requester's MAC directly, skipping the
        /// ARP lookup on TX.
        const BYPASS_ON_RESPONSE = 0b0100;
    }
}

impl Default for ArpPolicy {
    fn default() -> Self {
        Self::UPDATE_FROM_GRATUITOUS | Self::BYPASS_ON_RESPONSE
    }
}

/// One candidate IPv4 address, subject to duplicate-address detection
/// before the stack answers for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// Default gateway for this subnet.  Validated but otherwise unused:
    /// the stack serves exactly one directly-attached subnet.
    pub gateway: Option<Ipv4Addr>,
}

impl Candidate {
    pub const fn new(addr: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self {
            addr,
            mask,
            gateway: None,
        }
    }
}

impl FromStr for Candidate {
    type Err = ConfigError;

    /// Parse `"192.168.9.7/24"` or `"192.168.9.7/24=192.168.9.1"`.
    fn from_str(s: &str) -> Result<Self, ConfigError> {
        let bad = || ConfigError::BadCandidate(s.to_string());

        let (addr_part, gw_part) = match s.split_once('=') {
            Some((a, g)) => (a, Some(g)),
            None => (s, None),
        };
        let (addr, prefix) = addr_part.split_once('/').ok_or_else(bad)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| bad())?;
        let prefix: u8 = prefix.parse().map_err(|_| bad())?;
        let mask = Ipv4Addr::mask_from_prefix(prefix).ok_or_else(bad)?;
        let gateway = match gw_part {
            Some(g) => Some(g.parse().map_err(|_| bad())?),
            None => None,
        };
        Ok(Self {
            addr,
            mask,
            gateway,
        })
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask.prefix_len())?;
        if let Some(gw) = self.gateway {
            write!(f, " gw {gw}")?;
        }
        Ok(())
    }
}

/// The configuration surface read once at startup.
#[derive(Clone, Debug)]
pub struct StackConfig {
    /// TAP interface name.
    pub interface: String,
    /// Stack MAC address (single EUI-48).
    pub mac: MacAddr,
    /// Candidate addresses, in the order they were configured.
    pub candidates: Vec<Candidate>,
    /// Interface MTU: the largest IPv4 packet the transport carries.
    pub mtu: usize,
    pub policy: ArpPolicy,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            mac: DEFAULT_MAC,
            candidates: vec![Candidate {
                addr: Ipv4Addr([192, 168, 9, 7]),
                mask: Ipv4Addr([255, 255, 255, 0]),
                gateway: Some(Ipv4Addr([192, 168, 9, 1])),
            }],
            mtu: DEFAULT_MTU,
            policy: ArpPolicy::default(),
        }
    }
}

impl StackConfig {
    /// Check every invariant the pipeline relies on.  Called once before
    /// the transport is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.is_empty() {
            return Err(ConfigError::EmptyInterface);
        }
        if self.mac.is_zero() || self.mac.is_multicast() {
            return Err(ConfigError::InvalidMac(self.mac));
        }
        if !(MTU_MIN..=MTU_MAX).contains(&self.mtu) {
            return Err(ConfigError::MtuOutOfRange(self.mtu));
        }
        if self.candidates.is_empty() {
            return Err(ConfigError::NoCandidates);
        }

        for (i, cand) in self.candidates.iter().enumerate() {
            if !cand.mask.is_valid_mask() || cand.mask.prefix_len() == 0 {
                return Err(ConfigError::InvalidMask(*cand));
            }
            let network = cand.addr.network(cand.mask);
            let broadcast = cand.addr.directed_broadcast(cand.mask);
            if cand.addr.is_unspecified()
                || cand.addr.is_multicast()
                || cand.addr == network
                || cand.addr == broadcast
            {
                return Err(ConfigError::InvalidAddress(cand.addr));
            }
            if self.candidates[..i].iter().any(|c| c.addr == cand.addr) {
                return Err(ConfigError::DuplicateCandidate(cand.addr));
            }
            if let Some(gw) = cand.gateway {
                if !gw.in_subnet(cand.addr, cand.mask)
                    || gw == network
                    || gw == broadcast
                    || gw == cand.addr
                {
                    return Err(ConfigError::InvalidGateway {
                        gateway: gw,
                        candidate: *cand,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Reason the configuration was rejected at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    EmptyInterface,
    InvalidMac(MacAddr),
    MtuOutOfRange(usize),
    NoCandidates,
    BadCandidate(String),
    InvalidMask(Candidate),
    InvalidAddress(Ipv4Addr),
    DuplicateCandidate(Ipv4Addr),
    InvalidGateway {
        gateway: Ipv4Addr,
        candidate: Candidate,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInterface => write!(f, "interface name is empty"),
            Self::InvalidMac(mac) => {
                write!(f, "stack MAC {mac} must be a unicast, non-zero address")
            }
            Self::MtuOutOfRange(mtu) => {
                write!(f, "MTU {mtu} outside supported range {MTU_MIN}..={MTU_MAX}")
            }
            Self::NoCandidates => write!(f, "no candidate IPv4 addresses configured"),
            Self::BadCandidate(s) => {
                write!(f, "malformed candidate {s:?}, expected A.B.C.D/prefix[=gateway]")
            }
            Self::InvalidMask(c) => write!(f, "candidate {c} has a non-contiguous or empty mask"),
            Self::InvalidAddress(a) => {
                write!(f, "candidate address {a} is not a usable host address")
            }
            Self::DuplicateCandidate(a) => write!(f, "candidate address {a} configured twice"),
            Self::InvalidGateway { gateway, candidate } => {
                write!(f, "gateway {gateway} is not a host address inside {candidate}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(StackConfig::default().validate(), Ok(()));
    }

    #[test]
    fn candidate_literals() {
        let c: Candidate = "192.168.9.7/24=192.168.9.1".parse().unwrap();
        assert_eq!(c.addr, Ipv4Addr([192, 168, 9, 7]));
        assert_eq!(c.mask, Ipv4Addr([255, 255, 255, 0]));
        assert_eq!(c.gateway, Some(Ipv4Addr([192, 168, 9, 1])));

        let c: Candidate = "10.0.0.5/16".parse().unwrap();
        assert_eq!(c.mask, Ipv4Addr([255, 255, 0, 0]));
        assert_eq!(c.gateway, None);

        assert!("10.0.0.5".parse::<Candidate>().is_err());
        assert!("10.0.0.5/33".parse::<Candidate>().is_err());
        assert!("DUPA/24".parse::<Candidate>().is_err());
        assert!("10.0.0.5/24=DUPA".parse::<Candidate>().is_err());
    }

    fn config_with(candidates: Vec<Candidate>) -> StackConfig {
        StackConfig {
            candidates,
            ..StackConfig::default()
        }
    }

    #[test]
    fn rejects_bad_candidates() {
        let mask = Ipv4Addr([255, 255, 255, 0]);

        // Network and broadcast addresses are not host addresses.
        let net = Candidate::new(Ipv4Addr([192, 168, 9, 0]), mask);
        assert_eq!(
            config_with(vec![net]).validate(),
            Err(ConfigError::InvalidAddress(net.addr))
        );
        let bcast = Candidate::new(Ipv4Addr([192, 168, 9, 255]), mask);
        assert_eq!(
            config_with(vec![bcast]).validate(),
            Err(ConfigError::InvalidAddress(bcast.addr))
        );

        let dup = Candidate::new(Ipv4Addr([192, 168, 9, 7]), mask);
        assert_eq!(
            config_with(vec![dup, dup]).validate(),
            Err(ConfigError::DuplicateCandidate(dup.addr))
        );

        assert_eq!(
            config_with(vec![]).validate(),
            Err(ConfigError::NoCandidates)
        );
    }

    #[test]
    fn rejects_bad_gateways() {
        let mask = Ipv4Addr([255, 255, 255, 0]);
        for gw in [
            Ipv4Addr([10, 0, 0, 1]),     // outside the subnet
            Ipv4Addr([192, 168, 9, 0]),  // network address
            Ipv4Addr([192, 168, 9, 255]), // broadcast address
            Ipv4Addr([192, 168, 9, 7]),  // the candidate itself
        ] {
            let cand = Candidate {
                addr: Ipv4Addr([192, 168, 9, 7]),
                mask,
                gateway: Some(gw),
            };
            assert!(matches!(
                config_with(vec![cand]).validate(),
                Err(ConfigError::InvalidGateway { gateway, .. }) if gateway == gw
            ));
        }
    }

    #[test]
    fn rejects_bad_mac_and_mtu() {
        let mut cfg = StackConfig::default();
        cfg.mac = MacAddr::ZERO;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidMac(_))));

        let mut cfg = StackConfig::default();
        cfg.mac = MacAddr([0x01, 0, 0x5e, 0, 0, 1]); // multicast bit set
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidMac(_))));

        let mut cfg = StackConfig::default();
        cfg.mtu = 40;
        assert!(matches!(cfg.validate(), Err(ConfigError::MtuOutOfRange(40))));
    }
}
