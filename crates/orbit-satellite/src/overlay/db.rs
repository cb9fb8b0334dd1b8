// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::HashMap,
    sync::Mutex,
    time::SystemTime,
};

use async_trait::async_trait;
use orbit_core::{Node, NodeId};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tokio::sync::RwLock;

use super::{
    NodeCriteria,
    NodeDossier,
    NodeInfo,
    NodeStats,
    OverlayError,
    UpdateRequest,
};

/// The storage backend of the overlay cache.
///
/// Reputation updates are serializable per node; selections must return eligible nodes
/// in an order that is uniform across calls.
#[async_trait]
pub trait OverlayDb: Send + Sync + 'static {
    /// Looks up the node by `node_id`.
    async fn get(&self, node_id: NodeId) -> Result<NodeDossier, OverlayError>;

    /// Creates or updates the address record for a node.
    async fn update_address(&self, node: &Node) -> Result<(), OverlayError>;

    /// Initializes the stats for a node.
    async fn create_stats(
        &self,
        node_id: NodeId,
        initial: Option<NodeStats>,
    ) -> Result<NodeStats, OverlayError>;

    /// Applies an audit outcome to a node's stats. `alpha` is the smoothing weight of
    /// the previous ratio value.
    async fn update_stats(
        &self,
        request: &UpdateRequest,
        alpha: f64,
    ) -> Result<NodeStats, OverlayError>;

    /// Updates the dossier with information reported by the node itself.
    async fn update_node_info(
        &self,
        node_id: NodeId,
        info: &NodeInfo,
    ) -> Result<NodeDossier, OverlayError>;

    /// Records the outcome of an uptime check. `alpha` is the smoothing weight of the
    /// previous ratio value.
    async fn update_uptime(
        &self,
        node_id: NodeId,
        is_up: bool,
        alpha: f64,
    ) -> Result<NodeStats, OverlayError>;

    /// Selects up to `count` reputable nodes satisfying `criteria`, uniformly at
    /// random over the eligible nodes.
    async fn select_storage_nodes(
        &self,
        count: usize,
        criteria: &NodeCriteria,
    ) -> Result<Vec<Node>, OverlayError>;

    /// Selects up to `count` nodes that have not yet met the audit floor, uniformly at
    /// random over the eligible nodes.
    async fn select_new_storage_nodes(
        &self,
        count: usize,
        criteria: &NodeCriteria,
    ) -> Result<Vec<Node>, OverlayError>;

    /// Filters `ids` down to the nodes known to be unreliable or offline.
    ///
    /// Nodes the overlay has never heard of are not reported.
    async fn known_unreliable_or_offline(
        &self,
        criteria: &NodeCriteria,
        ids: &[NodeId],
    ) -> Result<Vec<NodeId>, OverlayError>;

    /// Pages through the dossiers ordered by node ID. Returns the page and whether
    /// more pages follow.
    async fn paginate(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<(Vec<NodeDossier>, bool), OverlayError>;
}

/// An in-memory [`OverlayDb`].
#[derive(Debug)]
pub struct MemOverlayDb {
    nodes: RwLock<HashMap<NodeId, NodeDossier>>,
    // Selection shuffles eligible nodes per call; deterministic ordering would bias
    // load toward a fixed subset.
    rng: Mutex<StdRng>,
}

impl MemOverlayDb {
    /// Creates an empty overlay DB seeded from entropy.
    pub fn new() -> Self {
        Self::new_with_seed(rand::random())
    }

    /// Creates an empty overlay DB with a deterministic selection order.
    pub fn new_with_seed(seed: u64) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn eligible(
        nodes: &HashMap<NodeId, NodeDossier>,
        criteria: &NodeCriteria,
        new_nodes: bool,
        now: SystemTime,
    ) -> Vec<Node> {
        nodes
            .values()
            .filter(|dossier| {
                let stats = &dossier.reputation;
                let pool_matches = if new_nodes {
                    stats.is_new(criteria)
                } else {
                    stats.is_reliable(criteria)
                };
                pool_matches
                    && stats.is_online(now, criteria.online_window)
                    && dossier.capacity.free_disk >= criteria.free_disk
                    && dossier.capacity.free_bandwidth >= criteria.free_bandwidth
                    && !criteria.excluded.contains(&dossier.node.id)
                    && version_at_least(&dossier.version, criteria.minimum_version.as_deref())
            })
            .map(|dossier| dossier.node.clone())
            .collect()
    }

    async fn select(
        &self,
        count: usize,
        criteria: &NodeCriteria,
        new_nodes: bool,
    ) -> Result<Vec<Node>, OverlayError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let nodes = self.nodes.read().await;
        let mut eligible = Self::eligible(&nodes, criteria, new_nodes, SystemTime::now());
        drop(nodes);

        let mut rng = self.rng.lock().expect("selection rng is never poisoned");
        eligible.shuffle(&mut *rng);
        eligible.truncate(count);
        Ok(eligible)
    }
}

impl Default for MemOverlayDb {
    fn default() -> Self {
        Self::new()
    }
}

/// Compares dotted numeric versions; an empty or absent minimum accepts everything.
fn version_at_least(version: &str, minimum: Option<&str>) -> bool {
    let Some(minimum) = minimum.filter(|minimum| !minimum.is_empty()) else {
        return true;
    };
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    parse(version) >= parse(minimum)
}

/// Applies one observation to an EMA-smoothed ratio.
fn smooth(ratio: f64, count: u64, success: bool, alpha: f64) -> f64 {
    let outcome = if success { 1.0 } else { 0.0 };
    if count <= 1 {
        outcome
    } else {
        alpha * ratio + (1.0 - alpha) * outcome
    }
}

fn record_contact(stats: &mut NodeStats, is_up: bool, now: SystemTime) {
    if is_up {
        stats.last_contact_success = Some(now);
    } else {
        stats.last_contact_failure = Some(now);
    }
}

#[async_trait]
impl OverlayDb for MemOverlayDb {
    async fn get(&self, node_id: NodeId) -> Result<NodeDossier, OverlayError> {
        self.nodes
            .read()
            .await
            .get(&node_id)
            .cloned()
            .ok_or(OverlayError::NodeNotFound(node_id))
    }

    async fn update_address(&self, node: &Node) -> Result<(), OverlayError> {
        let mut nodes = self.nodes.write().await;
        nodes
            .entry(node.id)
            .and_modify(|dossier| dossier.node.address = node.address.clone())
            .or_insert_with(|| NodeDossier {
                node: node.clone(),
                node_type: Default::default(),
                capacity: Default::default(),
                reputation: Default::default(),
                version: String::new(),
            });
        Ok(())
    }

    async fn create_stats(
        &self,
        node_id: NodeId,
        initial: Option<NodeStats>,
    ) -> Result<NodeStats, OverlayError> {
        let mut nodes = self.nodes.write().await;
        let dossier = nodes
            .get_mut(&node_id)
            .ok_or(OverlayError::NodeNotFound(node_id))?;
        dossier.reputation = initial.unwrap_or_default();
        Ok(dossier.reputation.clone())
    }

    async fn update_stats(
        &self,
        request: &UpdateRequest,
        alpha: f64,
    ) -> Result<NodeStats, OverlayError> {
        let mut nodes = self.nodes.write().await;
        let dossier = nodes
            .get_mut(&request.node_id)
            .ok_or(OverlayError::NodeNotFound(request.node_id))?;
        let stats = &mut dossier.reputation;

        stats.audit_count += 1;
        if request.audit_success {
            stats.audit_success_count += 1;
        }
        stats.audit_success_ratio = smooth(
            stats.audit_success_ratio,
            stats.audit_count,
            request.audit_success,
            alpha,
        );

        stats.uptime_count += 1;
        if request.is_up {
            stats.uptime_success_count += 1;
        }
        stats.uptime_success_ratio = smooth(
            stats.uptime_success_ratio,
            stats.uptime_count,
            request.is_up,
            alpha,
        );

        record_contact(stats, request.is_up, SystemTime::now());
        Ok(stats.clone())
    }

    async fn update_node_info(
        &self,
        node_id: NodeId,
        info: &NodeInfo,
    ) -> Result<NodeDossier, OverlayError> {
        let mut nodes = self.nodes.write().await;
        let dossier = nodes
            .get_mut(&node_id)
            .ok_or(OverlayError::NodeNotFound(node_id))?;
        dossier.node_type = info.node_type;
        dossier.capacity = info.capacity;
        dossier.version = info.version.clone();
        Ok(dossier.clone())
    }

    async fn update_uptime(
        &self,
        node_id: NodeId,
        is_up: bool,
        alpha: f64,
    ) -> Result<NodeStats, OverlayError> {
        let mut nodes = self.nodes.write().await;
        let dossier = nodes
            .get_mut(&node_id)
            .ok_or(OverlayError::NodeNotFound(node_id))?;
        let stats = &mut dossier.reputation;

        stats.uptime_count += 1;
        if is_up {
            stats.uptime_success_count += 1;
        }
        stats.uptime_success_ratio =
            smooth(stats.uptime_success_ratio, stats.uptime_count, is_up, alpha);

        record_contact(stats, is_up, SystemTime::now());
        Ok(stats.clone())
    }

    async fn select_storage_nodes(
        &self,
        count: usize,
        criteria: &NodeCriteria,
    ) -> Result<Vec<Node>, OverlayError> {
        self.select(count, criteria, false).await
    }

    async fn select_new_storage_nodes(
        &self,
        count: usize,
        criteria: &NodeCriteria,
    ) -> Result<Vec<Node>, OverlayError> {
        self.select(count, criteria, true).await
    }

    async fn known_unreliable_or_offline(
        &self,
        criteria: &NodeCriteria,
        ids: &[NodeId],
    ) -> Result<Vec<NodeId>, OverlayError> {
        let nodes = self.nodes.read().await;
        let now = SystemTime::now();
        Ok(ids
            .iter()
            .filter(|id| {
                nodes.get(id).is_some_and(|dossier| {
                    !dossier.reputation.is_reliable(criteria)
                        || !dossier.reputation.is_online(now, criteria.online_window)
                })
            })
            .copied()
            .collect())
    }

    async fn paginate(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<(Vec<NodeDossier>, bool), OverlayError> {
        let nodes = self.nodes.read().await;
        let mut dossiers: Vec<&NodeDossier> = nodes.values().collect();
        dossiers.sort_by_key(|dossier| dossier.node.id);

        let start = (offset as usize).min(dossiers.len());
        let end = start.saturating_add(limit).min(dossiers.len());
        let page = dossiers[start..end].iter().map(|d| (*d).clone()).collect();
        Ok((page, end < dossiers.len()))
    }
}
