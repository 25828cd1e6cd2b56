use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;

use crate::config::MAX_SAFE_TTL;

/// Multipath traceroute: maps every load-balanced path toward a destination
/// with flow-tagged probes and a confidence-driven stopping rule
#[derive(Parser, Debug, Clone)]
#[command(name = "mptrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Destination host to probe toward (IP address or hostname)
    #[arg(required = true)]
    pub destination: String,

    /// Address of the first hop (root of the discovered graph)
    #[arg(long = "first-hop")]
    pub first_hop: IpAddr,

    /// Confidence level for the stopping rule
    #[arg(short = 'a', long = "alpha", default_value = "0.95")]
    pub alpha: f64,

    /// First ttl to probe
    #[arg(long = "min-ttl", default_value = "1")]
    pub min_ttl: u8,

    /// Maximum ttl (hops)
    #[arg(short = 'm', long = "max-ttl", default_value = "30")]
    pub max_ttl: u8,

    /// Spacing between probes within a batch, in seconds
    #[arg(short = 'i', long = "inter", default_value = "0.01")]
    pub inter: f64,

    /// Per-round response timeout in seconds
    #[arg(long = "timeout", default_value = "2.0")]
    pub timeout: f64,

    /// Retry budget per probe round; negative keeps retrying as long as
    /// any response arrives
    #[arg(
        short = 'r',
        long = "retry",
        default_value = "2",
        allow_negative_numbers = true
    )]
    pub retry: i32,

    /// Consecutive unresponsive hops tolerated before giving up
    #[arg(long = "abort", default_value = "3")]
    pub abort: u32,

    /// Destination port for UDP probes
    #[arg(long = "port", default_value = "33434")]
    pub port: u16,

    /// Seed for the flow id generator (reproducible runs)
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Output JSON instead of the text report
    #[arg(long = "json")]
    pub json: bool,
}

impl Args {
    /// Get inter-probe spacing as Duration
    pub fn inter_duration(&self) -> Duration {
        Duration::from_secs_f64(self.inter)
    }

    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err("Alpha must lie strictly between 0 and 1".into());
        }

        if self.inter < 0.0 {
            return Err("Inter-probe spacing cannot be negative".into());
        }

        if self.timeout <= 0.0 {
            return Err("Timeout must be positive".into());
        }

        if self.min_ttl == 0 {
            return Err("Min TTL must be at least 1".into());
        }

        if self.max_ttl < self.min_ttl {
            return Err("Max TTL cannot be below min TTL".into());
        }

        if self.max_ttl > MAX_SAFE_TTL {
            return Err(format!("Max TTL cannot exceed {}", MAX_SAFE_TTL));
        }

        if self.abort < 2 {
            return Err("Abort threshold must be at least 2".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["mptrace", "example.net", "--first-hop", "192.168.0.1"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(parse(&[]).validate().is_ok());
    }

    #[test]
    fn test_negative_retry_parses() {
        let args = parse(&["--retry", "-3"]);
        assert_eq!(args.retry, -3);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_bad_alpha_rejected() {
        assert!(parse(&["--alpha", "1.5"]).validate().is_err());
    }

    #[test]
    fn test_inverted_ttls_rejected() {
        assert!(parse(&["--min-ttl", "8", "--max-ttl", "4"]).validate().is_err());
    }
}
