//! Generator configuration
//!
//! One explicit config struct passed into the engine entry point; no
//! process-wide mutable state, so repeated or parallel runs in one process
//! stay independent.

use std::path::Path;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::error::{GenError, Result};

/// Spacing of synthesized attack events within a vector's window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingPolicy {
    /// Events at exact `1/rate` intervals per host
    #[default]
    FixedInterval,
    /// Fixed intervals plus a seeded uniform offset within one interval
    Jittered,
}

/// Engine-wide options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Seed for address remapping and event timing. Same inputs plus same
    /// seed produce byte-identical output, across runs too.
    #[serde(default)]
    pub seed: u64,

    /// Prefix length applied to bare own-network prefixes like `172.16`
    #[serde(default = "default_prefix_len")]
    pub default_prefix_len: u8,

    /// Extra blocks the external remapping pool must avoid, on top of all
    /// declared own-network blocks
    #[serde(default)]
    pub pool_exclusions: Vec<Ipv4Network>,

    /// Cap on modeled hosts per vector per source network
    #[serde(default = "default_max_hosts")]
    pub max_hosts_per_vector: u32,

    /// Cap on events emitted per vector, to bound output size
    #[serde(default = "default_max_events")]
    pub max_events_per_vector: u64,

    #[serde(default)]
    pub timing: TimingPolicy,

    /// Randomize per-flow packet/byte counters within [base, 2*base]
    #[serde(default = "default_true")]
    pub volume_jitter: bool,
}

fn default_prefix_len() -> u8 {
    16
}

fn default_max_hosts() -> u32 {
    256
}

fn default_max_events() -> u64 {
    1_000_000
}

fn default_true() -> bool {
    true
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            default_prefix_len: default_prefix_len(),
            pool_exclusions: Vec::new(),
            max_hosts_per_vector: default_max_hosts(),
            max_events_per_vector: default_max_events(),
            timing: TimingPolicy::default(),
            volume_jitter: true,
        }
    }
}

impl GeneratorConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| GenError::Parse {
            file: path.display().to_string(),
            line: 0,
            msg: e.to_string(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.seed, 0);
        assert_eq!(config.default_prefix_len, 16);
        assert_eq!(config.timing, TimingPolicy::FixedInterval);
        assert!(config.volume_jitter);
    }

    #[test]
    fn test_toml_partial() {
        let config: GeneratorConfig = toml::from_str(
            r#"
            seed = 42
            pool_exclusions = ["192.168.0.0/16"]
            timing = "jittered"
        "#,
        )
        .unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.pool_exclusions.len(), 1);
        assert_eq!(config.timing, TimingPolicy::Jittered);
        assert_eq!(config.max_hosts_per_vector, 256);
    }
}
