use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cli::Args;

/// Upper bound on max_ttl to prevent resource exhaustion
pub const MAX_SAFE_TTL: u8 = 64;

/// Runtime configuration for one discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// First ttl to probe (> 0)
    pub min_ttl: u8,
    /// Last ttl to probe (>= min_ttl)
    pub max_ttl: u8,
    /// Target probability that all branches behind a vertex were found
    pub alpha: f64,
    /// Spacing between probes within a batch
    #[serde(with = "duration_serde")]
    pub inter: Duration,
    /// How long one round waits for responses after the last send
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Retry budget per dispatch; negative values reset the budget whenever
    /// a round gets at least one response
    pub retry: i32,
    /// Consecutive unresponsive hops tolerated before the run aborts (>= 2)
    pub abort: u32,
    /// Seed for the flow id generator (None = entropy)
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_ttl: 1,
            max_ttl: 30,
            alpha: 0.95,
            inter: Duration::from_millis(10),
            timeout: Duration::from_secs(2),
            retry: 2,
            abort: 3,
            seed: None,
        }
    }
}

impl Config {
    /// Reject contract violations before any probe is sent
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            bail!("alpha must lie strictly between 0 and 1, got {}", self.alpha);
        }
        if self.min_ttl == 0 {
            bail!("min_ttl must be at least 1");
        }
        if self.max_ttl < self.min_ttl {
            bail!(
                "max_ttl ({}) must not be below min_ttl ({})",
                self.max_ttl,
                self.min_ttl
            );
        }
        if self.max_ttl > MAX_SAFE_TTL {
            bail!("max_ttl cannot exceed {}", MAX_SAFE_TTL);
        }
        if self.timeout.is_zero() {
            bail!("timeout must be positive");
        }
        if self.abort < 2 {
            bail!("abort threshold must be at least 2, got {}", self.abort);
        }
        Ok(())
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            min_ttl: args.min_ttl,
            max_ttl: args.max_ttl,
            alpha: args.alpha,
            inter: args.inter_duration(),
            timeout: args.timeout_duration(),
            retry: args.retry,
            abort: args.abort,
            seed: args.seed,
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
