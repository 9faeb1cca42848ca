//! Types for parsing meld configuration files.
//!
//! The top level config type is [`Config`]. Config files are YAML, e.g.:
//!
//! ```yaml
//! threads:
//!   routing: 1
//!   memory: 4
//!   ebs: 4
//! replication:
//!   memory: 1
//!   ebs: 1
//!   local: 1
//!   minimum: 1
//! capacities:
//!   memory-cap: 1
//!   ebs-cap: 10
//! ebs: ./meld-data
//! user:
//!   routing:
//!     - "127.0.0.1"
//! ```

use serde::{Deserialize, Serialize};
use std::{net::IpAddr, path::PathBuf};

/// The top level config type.
///
/// This type can be read and written to config files using the [`serde::Serialize`] and
/// [`serde::Deserialize`] implementations.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The number of threads to start per node type.
    pub threads: Threads,
    /// Default replication factors for newly seen keys.
    pub replication: Replication,
    /// Storage capacities per tier, in MB.
    pub capacities: Capacities,
    /// Root directory under which disk-tier threads store their per-key files.
    pub ebs: PathBuf,
    /// Pre-populate the replication cache with defaults for synthetic
    /// benchmark keys on startup.
    #[serde(default)]
    pub warmup: bool,
    /// Client-facing settings; not read by storage nodes.
    pub user: Option<User>,
}

/// Number of threads for each node type.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Threads {
    /// The number of threads that each routing node runs.
    pub routing: u32,
    /// The number of threads that each memory-tier node runs.
    pub memory: u32,
    /// The number of threads that each disk-tier node runs.
    pub ebs: u32,
}

/// Default replication factors used for keys without explicit replication
/// metadata.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Replication {
    /// Default cross-node replication in the memory tier.
    pub memory: usize,
    /// Default cross-node replication in the disk tier.
    pub ebs: usize,
    /// Default replication across the threads within a node.
    pub local: usize,
    /// Minimum total number of replicas that the cluster should maintain.
    pub minimum: usize,
}

/// Node storage capacities, in MB.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Capacities {
    /// Capacity of memory-tier nodes.
    #[serde(rename = "memory-cap")]
    pub memory_cap: u64,
    /// Capacity of disk-tier nodes.
    #[serde(rename = "ebs-cap")]
    pub ebs_cap: u64,
}

/// Settings used by client proxies.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct User {
    /// The IP address that the client is reachable at.
    pub ip: Option<IpAddr>,
    /// The addresses of the routing nodes that the client should contact.
    pub routing: Option<Vec<String>>,
    /// A single load-balanced routing address, used instead of `routing` when
    /// the routing tier sits behind a load balancer.
    #[serde(rename = "routing-elb")]
    pub routing_elb: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_example_config() {
        let config: Config = serde_yaml::from_str(
            r#"
            threads:
              routing: 1
              memory: 2
              ebs: 3
            replication:
              memory: 1
              ebs: 2
              local: 1
              minimum: 1
            capacities:
              memory-cap: 1
              ebs-cap: 10
            ebs: ./meld-data
            user:
              routing:
                - "127.0.0.1"
            "#,
        )
        .unwrap();

        assert_eq!(config.threads.memory, 2);
        assert_eq!(config.threads.ebs, 3);
        assert_eq!(config.replication.ebs, 2);
        assert_eq!(config.capacities.ebs_cap, 10);
        assert_eq!(config.ebs, PathBuf::from("./meld-data"));
        assert!(!config.warmup);
        assert_eq!(
            config.user.unwrap().routing,
            Some(vec!["127.0.0.1".to_owned()])
        );
    }
}
