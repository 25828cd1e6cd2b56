use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::{IpAddr, ToSocketAddrs};
use tracing_subscriber::EnvFilter;

use mptrace::cli::Args;
use mptrace::config::Config;
use mptrace::export::{export_json, write_report};
use mptrace::probe::UdpTransport;
use mptrace::trace::DiamondMiner;

fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let destination = resolve_destination(&args.destination)?;
    let config = Config::from(&args);
    let transport = UdpTransport::new(destination, args.port)
        .context("Failed to open probe sockets (raw ICMP needs root/CAP_NET_RAW)")?;
    let mut miner = DiamondMiner::new(config, transport)?;

    let discovery = miner.discover(args.first_hop, Some(destination))?;

    let stdout = std::io::stdout();
    if args.json {
        export_json(&discovery, stdout.lock())?;
    } else {
        write_report(&discovery, stdout.lock())?;
    }

    Ok(())
}

/// Resolve a hostname or address literal to an IPv4 address
fn resolve_destination(host: &str) -> Result<IpAddr> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(addr);
    }

    let addrs = (host, 0)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", host))?;
    addrs
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| anyhow!("No IPv4 address found for {}", host))
}
