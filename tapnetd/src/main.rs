//! tapnetd — the stack daemon.
//!
//! Reads the configuration surface from the command line, attaches to the
//! TAP interface, and serves until a fatal transport error.  Exit codes:
//! 0 on clean shutdown, 1 for configuration problems, 2 for transport
//! failures.

use std::env;
use std::process::ExitCode;

use getopts::Options;
use log::error;
use tapnet_stack::{ArpPolicy, Candidate, Stack, StackConfig, StackError};

fn options() -> Options {
    let mut opts = Options::new();
    opts.optopt("i", "interface", "TAP interface name", "NAME");
    opts.optopt("m", "mac", "stack MAC address", "MAC");
    opts.optmulti(
        "a",
        "addr",
        "candidate address, repeatable (e.g. 192.168.9.7/24=192.168.9.1)",
        "IP/PREFIX[=GW]",
    );
    opts.optopt("", "mtu", "interface MTU", "BYTES");
    opts.optflag(
        "",
        "arp-learn-requests",
        "update the ARP cache from direct requests",
    );
    opts.optflag(
        "",
        "no-arp-learn-gratuitous",
        "ignore gratuitous ARP replies",
    );
    opts.optflag(
        "",
        "no-arp-bypass",
        "resolve reply destinations through the ARP cache",
    );
    opts.optflag("h", "help", "print this help");
    opts
}

fn parse_config(args: &[String]) -> Result<Option<StackConfig>, String> {
    let opts = options();
    let matches = opts.parse(args).map_err(|err| err.to_string())?;

    if matches.opt_present("h") {
        print!("{}", opts.usage("Usage: tapnetd [options]"));
        return Ok(None);
    }

    let mut config = StackConfig::default();

    if let Some(interface) = matches.opt_str("i") {
        config.interface = interface;
    }
    if let Some(mac) = matches.opt_str("m") {
        config.mac = mac
            .parse()
            .map_err(|_| format!("invalid MAC address {mac:?}"))?;
    }
    let addrs = matches.opt_strs("a");
    if !addrs.is_empty() {
        config.candidates = addrs
            .iter()
            .map(|s| s.parse::<Candidate>().map_err(|err| err.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
    }
    if let Some(mtu) = matches.opt_str("mtu") {
        config.mtu = mtu.parse().map_err(|_| format!("invalid MTU {mtu:?}"))?;
    }

    if matches.opt_present("arp-learn-requests") {
        config.policy |= ArpPolicy::UPDATE_FROM_DIRECT_REQUEST;
    }
    if matches.opt_present("no-arp-learn-gratuitous") {
        config.policy -= ArpPolicy::UPDATE_FROM_GRATUITOUS;
    }
    if matches.opt_present("no-arp-bypass") {
        config.policy -= ArpPolicy::BYPASS_ON_RESPONSE;
    }

    Ok(Some(config))
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = match parse_config(&args) {
        Ok(Some(config)) => config,
        Ok(None) => return ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tapnetd: {err}");
            return ExitCode::from(1);
        }
    };

    let stack = match Stack::open(config) {
        Ok(stack) => stack,
        Err(err @ StackError::Config(_)) => {
            eprintln!("tapnetd: {err}");
            return ExitCode::from(1);
        }
        Err(err @ StackError::Io(_)) => {
            eprintln!("tapnetd: {err}");
            return ExitCode::from(2);
        }
    };

    match stack.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("tapnetd: {err}");
            ExitCode::from(2)
        }
    }
}
