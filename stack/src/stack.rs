//! The stack context: every component wired together, plus the thread
//! lifecycle.
//!
//! # Threads
//!
//! [`Stack::run`] spawns four long-lived threads and then runs the claim
//! loop on the calling thread:
//!
//! - `tapnet-ingress` — transport read side → RX ring
//! - `tapnet-rx` — RX ring → packet handler (may enqueue on the TX ring)
//! - `tapnet-egress` — TX ring → ARP resolution → transport write side
//! - `tapnet-timer` — 1 Hz ARP cache sweep
//!
//! Shutdown is cooperative: [`Stack::shutdown`] raises the stop flag and
//! closes both rings; threads observe that at their next dequeue.  The
//! first fatal transport error wins, triggers shutdown, and becomes the
//! return value of `run`.  The ingress thread may be parked in a blocking
//! `read` with no frame in flight; it is detached rather than joined and
//! exits with the process.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use log::{error, info};

use crate::arp_cache::ArpCache;
use crate::claim;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, StackConfig};
use crate::egress;
use crate::handler::PacketHandler;
use crate::identity::StackIdentity;
use crate::ingress;
use crate::ring::{DEFAULT_RING_CAPACITY, Ring, RxRing, TxRing};
use crate::socket::{TcpRegistry, UdpRegistry};
use crate::tap::TapDevice;
use crate::timer;

/// Top-level error: everything that can end the stack.
#[derive(Debug)]
pub enum StackError {
    Config(ConfigError),
    Io(io::Error),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Io(err) => write!(f, "transport error: {err}"),
        }
    }
}

impl std::error::Error for StackError {}

impl From<ConfigError> for StackError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<io::Error> for StackError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// State every thread holds a handle to: the rings, the stop flag, and
/// the fatal error slot.
struct Shared {
    rx_ring: Arc<RxRing>,
    tx_ring: Arc<TxRing>,
    stop: AtomicBool,
    fatal: Mutex<Option<io::Error>>,
    stopped: Mutex<bool>,
    stopped_cv: Condvar,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            rx_ring: Arc::new(Ring::new(capacity)),
            tx_ring: Arc::new(Ring::new(capacity)),
            stop: AtomicBool::new(false),
            fatal: Mutex::new(None),
            stopped: Mutex::new(false),
            stopped_cv: Condvar::new(),
        }
    }

    fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.rx_ring.close();
        self.tx_ring.close();
        let mut stopped = self
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.stopped_cv.notify_all();
    }

    /// Record the first fatal error and bring everything down.
    fn fail(&self, err: io::Error) {
        {
            let mut slot = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.shutdown();
    }

    fn wait_stopped(&self) {
        let mut stopped = self
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            stopped = self
                .stopped_cv
                .wait(stopped)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// A fully wired stack attached to its TAP endpoint.
pub struct Stack {
    config: StackConfig,
    tap: Arc<TapDevice>,
    identity: Arc<StackIdentity>,
    cache: Arc<ArpCache>,
    handler: Arc<PacketHandler>,
    udp_sockets: Arc<UdpRegistry>,
    tcp_sockets: Arc<TcpRegistry>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
}

impl Stack {
    /// Validate the configuration and attach to the transport.  Nothing
    /// runs yet; collaborators may still register sockets.
    pub fn open(config: StackConfig) -> Result<Self, StackError> {
        config.validate()?;
        let tap = Arc::new(TapDevice::open(&config.interface)?);
        info!(
            "stack: attached to {} as {} with {} candidate address(es)",
            tap.name(),
            config.mac,
            config.candidates.len()
        );

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let identity = Arc::new(StackIdentity::new(config.mac, config.candidates.clone()));
        let cache = Arc::new(ArpCache::new(config.policy));
        let udp_sockets = Arc::new(UdpRegistry::new());
        let tcp_sockets = Arc::new(TcpRegistry::new());
        let shared = Arc::new(Shared::new(DEFAULT_RING_CAPACITY));

        let handler = Arc::new(PacketHandler::new(
            Arc::clone(&identity),
            Arc::clone(&cache),
            Arc::clone(&shared.tx_ring),
            Arc::clone(&udp_sockets),
            Arc::clone(&tcp_sockets),
            Arc::clone(&clock),
            config.mtu,
            config.policy,
        ));

        Ok(Self {
            config,
            tap,
            identity,
            cache,
            handler,
            udp_sockets,
            tcp_sockets,
            clock,
            shared,
        })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// The TX composition entry point for originated traffic.
    pub fn handler(&self) -> &Arc<PacketHandler> {
        &self.handler
    }

    pub fn udp_sockets(&self) -> &Arc<UdpRegistry> {
        &self.udp_sockets
    }

    pub fn tcp_sockets(&self) -> &Arc<TcpRegistry> {
        &self.tcp_sockets
    }

    /// Spawn the pipeline, run the claim loop, then serve until shutdown
    /// or a fatal transport error.
    pub fn run(&self) -> Result<(), StackError> {
        let mut joinable = Vec::new();

        {
            let tap = Arc::clone(&self.tap);
            let clock = Arc::clone(&self.clock);
            let shared = Arc::clone(&self.shared);
            let mtu = self.config.mtu;
            // Detached: may be parked in a blocking read at shutdown.
            thread::Builder::new()
                .name("tapnet-ingress".into())
                .spawn(move || {
                    if let Err(err) =
                        ingress::run(&tap, &shared.rx_ring, &*clock, mtu, &shared.stop)
                    {
                        error!("ingress: fatal: {err}");
                        shared.fail(err);
                    }
                })
                .map_err(StackError::Io)?;
        }

        {
            let handler = Arc::clone(&self.handler);
            let shared = Arc::clone(&self.shared);
            joinable.push(
                thread::Builder::new()
                    .name("tapnet-rx".into())
                    .spawn(move || handler.run(&shared.rx_ring, &shared.stop))
                    .map_err(StackError::Io)?,
            );
        }

        {
            let tap = Arc::clone(&self.tap);
            let cache = Arc::clone(&self.cache);
            let identity = Arc::clone(&self.identity);
            let clock = Arc::clone(&self.clock);
            let shared = Arc::clone(&self.shared);
            joinable.push(
                thread::Builder::new()
                    .name("tapnet-egress".into())
                    .spawn(move || {
                        if let Err(err) = egress::run(
                            &tap,
                            &shared.tx_ring,
                            &cache,
                            &identity,
                            &*clock,
                            &shared.stop,
                        ) {
                            error!("egress: fatal: {err}");
                            shared.fail(err);
                        }
                    })
                    .map_err(StackError::Io)?,
            );
        }

        {
            let cache = Arc::clone(&self.cache);
            let clock = Arc::clone(&self.clock);
            let shared = Arc::clone(&self.shared);
            joinable.push(
                thread::Builder::new()
                    .name("tapnet-timer".into())
                    .spawn(move || timer::run(&cache, &*clock, &shared.stop))
                    .map_err(StackError::Io)?,
            );
        }

        // Duplicate-address detection needs the RX path alive to spot
        // objections, so it runs after the spawns, on this thread.
        claim::run_claim(&self.handler, &self.identity, &*self.clock);

        self.shared.wait_stopped();
        for handle in joinable {
            let _ = handle.join();
        }

        let fatal = self
            .shared
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match fatal {
            Some(err) => Err(StackError::Io(err)),
            None => {
                info!("stack: clean shutdown");
                Ok(())
            }
        }
    }

    /// Cooperative shutdown: raise the stop flag and close both rings.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}
