// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! The overlay node-health cache.
//!
//! The cache tracks a dossier per storage node: its address, capacity, version, and
//! reputation (audit and uptime history). It answers two questions for the repair
//! pipeline: which of a segment's nodes are unreliable or offline, and which nodes are
//! fit to receive new pieces.

use std::time::{Duration, SystemTime};

use orbit_core::{Node, NodeId};
use serde::{Deserialize, Serialize};

mod cache;
mod db;

pub use cache::Cache;
pub use db::{MemOverlayDb, OverlayDb};

/// A node's advertised free resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapacity {
    /// Free disk space in bytes.
    pub free_disk: u64,
    /// Free bandwidth in bytes.
    pub free_bandwidth: u64,
}

/// The role a node plays in the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// The node's role is not yet known.
    #[default]
    Unknown,
    /// A storage node.
    Storage,
    /// An uplink client.
    Uplink,
    /// A satellite.
    Satellite,
}

/// Statistics about a node's audit and uptime history.
///
/// Ratios are exponential moving averages; see
/// [`NodeSelectionConfig::reputation_alpha`][crate::config::NodeSelectionConfig].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Number of audits performed against the node.
    pub audit_count: u64,
    /// Number of successful audits.
    pub audit_success_count: u64,
    /// Smoothed audit success ratio.
    pub audit_success_ratio: f64,
    /// Number of uptime checks performed against the node.
    pub uptime_count: u64,
    /// Number of successful uptime checks.
    pub uptime_success_count: u64,
    /// Smoothed uptime success ratio.
    pub uptime_success_ratio: f64,
    /// The last time the node was contacted successfully.
    pub last_contact_success: Option<SystemTime>,
    /// The last time contacting the node failed.
    pub last_contact_failure: Option<SystemTime>,
}

/// The complete information the satellite tracks for a storage node.
///
/// Created on first successful contact, mutated by the audit, uptime, and node-info
/// paths, and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDossier {
    /// The node's identifier and address.
    pub node: Node,
    /// The node's role.
    pub node_type: NodeType,
    /// The node's advertised free resources.
    pub capacity: NodeCapacity,
    /// The node's reputation.
    pub reputation: NodeStats,
    /// The node's reported software version.
    pub version: String,
}

/// The requirements a node must meet to be selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeCriteria {
    /// Required free bandwidth in bytes.
    pub free_bandwidth: u64,
    /// Required free disk in bytes.
    pub free_disk: u64,
    /// Minimum number of audits.
    pub audit_count: u64,
    /// Minimum audit success ratio.
    pub audit_success_ratio: f64,
    /// Minimum number of uptime checks.
    pub uptime_count: u64,
    /// Minimum uptime success ratio.
    pub uptime_success_ratio: f64,
    /// Nodes that must not be returned.
    pub excluded: Vec<NodeId>,
    /// Nodes below this version are not returned. `None` disables the check.
    pub minimum_version: Option<String>,
    /// The window within which a node's last successful contact must fall.
    pub online_window: Duration,
}

/// Parameters for a storage-node selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindStorageNodesRequest {
    /// Hard lower bound on the number of nodes; defaults to `requested_count`.
    pub minimum_required: usize,
    /// The number of nodes to select.
    pub requested_count: usize,
    /// Required free bandwidth in bytes.
    pub free_bandwidth: u64,
    /// Required free disk in bytes.
    pub free_disk: u64,
    /// Nodes that must not be returned.
    pub excluded: Vec<NodeId>,
    /// Nodes below this version are not returned. `None` falls back to preferences.
    pub minimum_version: Option<String>,
}

/// A reputation update produced by an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    /// The audited node.
    pub node_id: NodeId,
    /// Whether the audit succeeded.
    pub audit_success: bool,
    /// Whether the node answered at all.
    pub is_up: bool,
}

/// Capacity, type, and version information reported by a node about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// The node's role.
    pub node_type: NodeType,
    /// The node's advertised free resources.
    pub capacity: NodeCapacity,
    /// The node's software version.
    pub version: String,
}

/// Errors returned by the overlay cache.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// The all-zero node ID was passed where a real node is required.
    #[error("empty node ID")]
    EmptyNode,
    /// The node does not exist in the overlay.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    /// The node record does not match the provided node ID.
    #[error("node record for {expected} carries mismatched ID {got}")]
    IdMismatch {
        /// The ID the caller addressed.
        expected: NodeId,
        /// The ID inside the record.
        got: NodeId,
    },
    /// Fewer nodes than requested satisfy the criteria. Recoverable: callers may retry
    /// with relaxed criteria.
    #[error("not enough nodes: requested {requested}, found {found}; criteria: {criteria:?}")]
    NotEnoughNodes {
        /// The number of nodes requested.
        requested: usize,
        /// The number of eligible nodes found.
        found: usize,
        /// The criteria used, for diagnostics.
        criteria: Box<NodeCriteria>,
    },
}

impl NodeStats {
    /// Whether the node is online under the given window: the last successful contact
    /// is recent enough and more recent than the last failure.
    pub fn is_online(&self, now: SystemTime, online_window: Duration) -> bool {
        let Some(success) = self.last_contact_success else {
            return false;
        };
        let recent_enough = now
            .duration_since(success)
            .map(|elapsed| elapsed < online_window)
            .unwrap_or(true);
        let success_is_latest = match self.last_contact_failure {
            Some(failure) => success > failure,
            None => true,
        };
        recent_enough && success_is_latest
    }

    /// Whether the node has met the audit and uptime floors of `criteria`.
    pub fn is_reliable(&self, criteria: &NodeCriteria) -> bool {
        self.audit_count >= criteria.audit_count
            && self.audit_success_ratio >= criteria.audit_success_ratio
            && self.uptime_count >= criteria.uptime_count
            && self.uptime_success_ratio >= criteria.uptime_success_ratio
    }

    /// Whether the node still counts as "new": it has not yet met the audit floor.
    pub fn is_new(&self, criteria: &NodeCriteria) -> bool {
        self.audit_count < criteria.audit_count
    }
}
