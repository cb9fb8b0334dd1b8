// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Satellite configuration.
//!
//! The configuration is an immutable value constructed at startup and passed by
//! reference to every component; nothing here is a process-wide singleton.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// Configuration of a satellite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteConfig {
    /// Configuration of the pointer store.
    #[serde(default)]
    pub metainfo: MetainfoConfig,
    /// Preferences for node selection and reputation.
    #[serde(default)]
    pub node_selection: NodeSelectionConfig,
    /// Configuration of the order issuer.
    #[serde(default)]
    pub orders: OrderConfig,
    /// Configuration of the repair engine and checker.
    #[serde(default)]
    pub repair: RepairConfig,
}

/// Configuration of the pointer store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetainfoConfig {
    /// The database connection string to use. Recognized schemes: `mem://`,
    /// `bolt://<path>` (alias `sled://`), and `postgres://`.
    #[serde(default = "defaults::database_url")]
    pub database_url: String,
    /// Remote pointers for segments smaller than this are rejected as inline-only.
    #[serde(default = "defaults::min_remote_segment_size")]
    pub min_remote_segment_size: u64,
    /// Ceiling for inline storage decisions.
    #[serde(default = "defaults::max_inline_segment_size")]
    pub max_inline_segment_size: u64,
}

impl Default for MetainfoConfig {
    fn default() -> Self {
        Self {
            database_url: defaults::database_url(),
            min_remote_segment_size: defaults::min_remote_segment_size(),
            max_inline_segment_size: defaults::max_inline_segment_size(),
        }
    }
}

/// Preferences for node selection and reputation bookkeeping.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSelectionConfig {
    /// A node is online iff its last successful contact is within this window and more
    /// recent than its last failed contact.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "online_window_secs", default = "defaults::online_window")]
    pub online_window: Duration,
    /// Minimum number of audits a node must have to count as reputable.
    #[serde(default = "defaults::audit_count")]
    pub audit_count: u64,
    /// Minimum audit success ratio a node must have to count as reputable.
    #[serde(default = "defaults::audit_success_ratio")]
    pub audit_success_ratio: f64,
    /// Minimum number of uptime checks a node must have to count as reputable.
    #[serde(default = "defaults::uptime_count")]
    pub uptime_count: u64,
    /// Minimum uptime success ratio a node must have to count as reputable.
    #[serde(default = "defaults::uptime_success_ratio")]
    pub uptime_success_ratio: f64,
    /// The fraction of each selection that is filled with nodes that have not yet met
    /// the audit floor. In `[0, 1]`.
    #[serde(default = "defaults::new_node_fraction")]
    pub new_node_fraction: f64,
    /// Weight of the previous value when smoothing reputation ratios:
    /// `ratio' = alpha * ratio + (1 - alpha) * outcome`.
    #[serde(default = "defaults::reputation_alpha")]
    pub reputation_alpha: f64,
    /// Nodes below this version are never selected. `None` disables the check.
    #[serde(default)]
    pub minimum_version: Option<String>,
}

impl Default for NodeSelectionConfig {
    fn default() -> Self {
        Self {
            online_window: defaults::online_window(),
            audit_count: defaults::audit_count(),
            audit_success_ratio: defaults::audit_success_ratio(),
            uptime_count: defaults::uptime_count(),
            uptime_success_ratio: defaults::uptime_success_ratio(),
            new_node_fraction: defaults::new_node_fraction(),
            reputation_alpha: defaults::reputation_alpha(),
            minimum_version: None,
        }
    }
}

/// Configuration of the order issuer.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfig {
    /// Lifespan of issued order limits.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "expiration_secs", default = "defaults::order_expiration")]
    pub expiration: Duration,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            expiration: defaults::order_expiration(),
        }
    }
}

/// Configuration of the repair engine and checker.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Maximum number of segments repaired concurrently.
    #[serde(default = "defaults::repair_max_concurrent")]
    pub max_concurrent: usize,
    /// Deadline for one repair, classification through commit.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "timeout_secs", default = "defaults::repair_timeout")]
    pub timeout: Duration,
    /// Interval between checker scans of the pointer store.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        rename = "checker_interval_secs",
        default = "defaults::checker_interval"
    )]
    pub checker_interval: Duration,
    /// Maximum number of segments queued for repair; further enqueues are dropped
    /// until the next scan.
    #[serde(default = "defaults::repair_queue_capacity")]
    pub queue_capacity: usize,
    /// Minimum delay before a failed repair is retried.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "min_backoff_secs", default = "defaults::repair_min_backoff")]
    pub min_backoff: Duration,
    /// Maximum delay before a failed repair is retried.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "max_backoff_secs", default = "defaults::repair_max_backoff")]
    pub max_backoff: Duration,
    /// When set, repairs trigger at this healthy-piece count instead of the repair
    /// threshold carried by each segment's redundancy scheme.
    #[serde(default)]
    pub repair_threshold: Option<u16>,
    /// When set, repairs must store at least this many pieces instead of the success
    /// threshold carried by each segment's redundancy scheme.
    #[serde(default)]
    pub success_threshold: Option<u16>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::repair_max_concurrent(),
            timeout: defaults::repair_timeout(),
            checker_interval: defaults::checker_interval(),
            queue_capacity: defaults::repair_queue_capacity(),
            min_backoff: defaults::repair_min_backoff(),
            max_backoff: defaults::repair_max_backoff(),
            repair_threshold: None,
            success_threshold: None,
        }
    }
}

/// Default values for the satellite configuration.
pub mod defaults {
    use std::time::Duration;

    /// Default pointer-store connection string.
    pub fn database_url() -> String {
        "bolt://pointerdb".to_string()
    }

    /// Default minimum remote segment size in bytes.
    pub fn min_remote_segment_size() -> u64 {
        1240
    }

    /// Default maximum inline segment size in bytes.
    pub fn max_inline_segment_size() -> u64 {
        8000
    }

    /// Default online window.
    pub fn online_window() -> Duration {
        Duration::from_secs(3600)
    }

    /// Default audit-count floor.
    pub fn audit_count() -> u64 {
        2
    }

    /// Default audit success-ratio floor.
    pub fn audit_success_ratio() -> f64 {
        0.6
    }

    /// Default uptime-count floor.
    pub fn uptime_count() -> u64 {
        2
    }

    /// Default uptime success-ratio floor.
    pub fn uptime_success_ratio() -> f64 {
        0.9
    }

    /// Default fraction of new nodes per selection.
    pub fn new_node_fraction() -> f64 {
        0.05
    }

    /// Default smoothing weight for reputation ratios.
    pub fn reputation_alpha() -> f64 {
        0.95
    }

    /// Default lifespan of issued order limits.
    pub fn order_expiration() -> Duration {
        Duration::from_secs(45 * 24 * 3600)
    }

    /// Default repair concurrency.
    pub fn repair_max_concurrent() -> usize {
        5
    }

    /// Default per-repair deadline.
    pub fn repair_timeout() -> Duration {
        Duration::from_secs(120)
    }

    /// Default checker scan interval.
    pub fn checker_interval() -> Duration {
        Duration::from_secs(30)
    }

    /// Default repair queue capacity.
    pub fn repair_queue_capacity() -> usize {
        10_000
    }

    /// Default minimum retry backoff.
    pub fn repair_min_backoff() -> Duration {
        Duration::from_secs(1)
    }

    /// Default maximum retry backoff.
    pub fn repair_max_backoff() -> Duration {
        Duration::from_secs(3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = SatelliteConfig::default();
        let yaml = serde_yaml::to_string(&config).expect("serializes");
        let parsed: SatelliteConfig = serde_yaml::from_str(&yaml).expect("parses");
        assert_eq!(config, parsed);
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let parsed: SatelliteConfig = serde_yaml::from_str("{}").expect("parses");
        assert_eq!(parsed, SatelliteConfig::default());
    }

    #[test]
    fn config_loads_from_a_yaml_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("satellite.yaml");
        std::fs::write(&path, "metainfo:\n  database_url: \"mem://\"\n").expect("writes");

        let config: SatelliteConfig =
            crate::utils::load_from_yaml(&path).expect("loads");
        assert_eq!(config.metainfo.database_url, "mem://");
        assert_eq!(config.repair, RepairConfig::default());
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let parsed: SatelliteConfig = serde_yaml::from_str(
            "repair:\n  timeout_secs: 7\nnode_selection:\n  audit_count: 10\n",
        )
        .expect("parses");
        assert_eq!(parsed.repair.timeout, Duration::from_secs(7));
        assert_eq!(parsed.node_selection.audit_count, 10);
        assert_eq!(
            parsed.repair.checker_interval,
            defaults::checker_interval(),
            "unnamed fields keep their defaults"
        );
    }
}
