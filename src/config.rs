//! # Runtime Configuration
//!
//! Static description of the world an MPI job runs in: how many ranks exist
//! in total and how many physical nodes they are spread across. Ranks are
//! placed round-robin, so node `n` hosts PIDs `n, n + nodes, n + 2*nodes, …`.
//!
//! The configuration is plain data: it can be built literally in tests,
//! loaded from the environment on real deployments, or round-tripped through
//! JSON by an external launcher.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the world size.
pub const ENV_WORLD_SIZE: &str = "LWMPI_WORLD_SIZE";

/// Environment variable overriding the node count.
pub const ENV_NODES: &str = "LWMPI_NODES";

/// World layout for one MPI job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Total number of MPI ranks in the world.
    pub world_size: usize,

    /// Number of physical nodes the ranks are spread across.
    pub nodes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            world_size: 1,
            nodes: 1,
        }
    }
}

impl RuntimeConfig {
    /// Single-node configuration with `world_size` cohabiting ranks.
    pub fn single_node(world_size: usize) -> Self {
        RuntimeConfig {
            world_size,
            nodes: 1,
        }
    }

    /// Builds a configuration from `LWMPI_WORLD_SIZE` / `LWMPI_NODES`,
    /// falling back to the defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        let mut config = RuntimeConfig::default();

        if let Ok(raw) = std::env::var(ENV_WORLD_SIZE) {
            config.world_size = raw
                .parse()
                .map_err(|_| anyhow!("invalid {}: {:?}", ENV_WORLD_SIZE, raw))?;
        }
        if let Ok(raw) = std::env::var(ENV_NODES) {
            config.nodes = raw
                .parse()
                .map_err(|_| anyhow!("invalid {}: {:?}", ENV_NODES, raw))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(anyhow!("world_size must be at least 1"));
        }
        if self.nodes == 0 {
            return Err(anyhow!("nodes must be at least 1"));
        }
        if self.nodes > self.world_size {
            return Err(anyhow!(
                "nodes ({}) cannot exceed world_size ({})",
                self.nodes,
                self.world_size
            ));
        }
        Ok(())
    }

    /// Node hosting rank `pid` under round-robin placement.
    pub fn node_of(&self, pid: usize) -> usize {
        pid % self.nodes
    }

    /// PIDs hosted by `node`, lowest first.
    pub fn local_pids(&self, node: usize) -> Vec<usize> {
        (node..self.world_size).step_by(self.nodes).collect()
    }
}
