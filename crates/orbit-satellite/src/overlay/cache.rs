// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use orbit_core::{pointer::PieceRef, Node, NodeId, PieceIndex};

use super::{
    FindStorageNodesRequest,
    NodeCriteria,
    NodeDossier,
    NodeInfo,
    NodeStats,
    OverlayDb,
    OverlayError,
    UpdateRequest,
};
use crate::{config::NodeSelectionConfig, pieces::ContactObserver};

/// The overlay node-health cache.
///
/// A thin, policy-carrying front over an [`OverlayDb`]: it owns the selection
/// preferences and translates them into the criteria the backend filters with.
#[derive(Clone)]
pub struct Cache {
    db: Arc<dyn OverlayDb>,
    preferences: NodeSelectionConfig,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("preferences", &self.preferences)
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Creates a new cache over the provided backend.
    pub fn new(db: Arc<dyn OverlayDb>, preferences: NodeSelectionConfig) -> Self {
        Self { db, preferences }
    }

    /// The selection preferences this cache applies.
    pub fn preferences(&self) -> &NodeSelectionConfig {
        &self.preferences
    }

    /// Looks up the provided node ID.
    pub async fn get(&self, node_id: NodeId) -> Result<NodeDossier, OverlayError> {
        if node_id.is_zero() {
            return Err(OverlayError::EmptyNode);
        }
        self.db.get(node_id).await
    }

    /// Adds or refreshes a node's address record.
    ///
    /// A zero node ID is silently ignored; a record whose ID does not match `node_id`
    /// is rejected.
    pub async fn put(&self, node_id: NodeId, node: &Node) -> Result<(), OverlayError> {
        if node_id.is_zero() {
            return Ok(());
        }
        if node_id != node.id {
            return Err(OverlayError::IdMismatch {
                expected: node_id,
                got: node.id,
            });
        }
        self.db.update_address(node).await
    }

    /// Initializes the reputation stats for a node.
    pub async fn create_stats(
        &self,
        node_id: NodeId,
        initial: Option<NodeStats>,
    ) -> Result<NodeStats, OverlayError> {
        self.db.create_stats(node_id, initial).await
    }

    /// Applies an audit outcome to a node's reputation.
    pub async fn update_stats(&self, request: &UpdateRequest) -> Result<NodeStats, OverlayError> {
        self.db
            .update_stats(request, self.preferences.reputation_alpha)
            .await
    }

    /// Updates a node's self-reported type, capacity, and version.
    pub async fn update_node_info(
        &self,
        node_id: NodeId,
        info: &NodeInfo,
    ) -> Result<NodeDossier, OverlayError> {
        self.db.update_node_info(node_id, info).await
    }

    /// Records the outcome of an uptime check.
    pub async fn update_uptime(
        &self,
        node_id: NodeId,
        is_up: bool,
    ) -> Result<NodeStats, OverlayError> {
        self.db
            .update_uptime(node_id, is_up, self.preferences.reputation_alpha)
            .await
    }

    /// Pages through the known dossiers ordered by node ID.
    pub async fn paginate(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<(Vec<NodeDossier>, bool), OverlayError> {
        self.db.paginate(offset, limit).await
    }

    /// Searches the overlay for nodes that satisfy the request under the cache's own
    /// preferences.
    pub async fn find_storage_nodes(
        &self,
        request: FindStorageNodesRequest,
    ) -> Result<Vec<Node>, OverlayError> {
        self.find_storage_nodes_with_preferences(request, &self.preferences)
            .await
    }

    /// Searches the overlay for nodes that satisfy the request.
    ///
    /// A fraction of the result is reserved for "new" nodes (nodes that have not yet
    /// met the audit floor); the remainder must be fully reputable. Selected new nodes
    /// are excluded from the reputable pass so the two pools never overlap.
    pub async fn find_storage_nodes_with_preferences(
        &self,
        request: FindStorageNodesRequest,
        preferences: &NodeSelectionConfig,
    ) -> Result<Vec<Node>, OverlayError> {
        let target = if request.minimum_required > 0 {
            request.minimum_required.max(request.requested_count)
        } else {
            request.requested_count
        };

        let minimum_version = request
            .minimum_version
            .clone()
            .or_else(|| preferences.minimum_version.clone());
        let mut excluded = request.excluded.clone();

        let new_target = if preferences.new_node_fraction > 0.0 {
            (target as f64 * preferences.new_node_fraction) as usize
        } else {
            0
        };
        let new_nodes = if new_target > 0 {
            self.db
                .select_new_storage_nodes(
                    new_target,
                    &NodeCriteria {
                        free_bandwidth: request.free_bandwidth,
                        free_disk: request.free_disk,
                        audit_count: preferences.audit_count,
                        audit_success_ratio: preferences.audit_success_ratio,
                        uptime_count: 0,
                        uptime_success_ratio: 0.0,
                        excluded: excluded.clone(),
                        minimum_version: minimum_version.clone(),
                        online_window: preferences.online_window,
                    },
                )
                .await?
        } else {
            Vec::new()
        };

        // The new nodes join the excluded set so the reputable pass cannot return
        // them a second time.
        excluded.extend(new_nodes.iter().map(|node| node.id));

        let criteria = NodeCriteria {
            free_bandwidth: request.free_bandwidth,
            free_disk: request.free_disk,
            audit_count: preferences.audit_count,
            audit_success_ratio: preferences.audit_success_ratio,
            uptime_count: preferences.uptime_count,
            uptime_success_ratio: preferences.uptime_success_ratio,
            excluded,
            minimum_version,
            online_window: preferences.online_window,
        };
        let reputable = self
            .db
            .select_storage_nodes(target - new_nodes.len(), &criteria)
            .await?;

        let mut nodes = new_nodes;
        nodes.extend(reputable);

        if nodes.len() < target {
            return Err(OverlayError::NotEnoughNodes {
                requested: target,
                found: nodes.len(),
                criteria: Box::new(criteria),
            });
        }
        Ok(nodes)
    }

    /// Filters `ids` down to the nodes known to be unreliable or offline under the
    /// cache's preferences.
    pub async fn known_unreliable_or_offline(
        &self,
        ids: &[NodeId],
    ) -> Result<Vec<NodeId>, OverlayError> {
        let criteria = NodeCriteria {
            audit_count: self.preferences.audit_count,
            audit_success_ratio: self.preferences.audit_success_ratio,
            uptime_count: self.preferences.uptime_count,
            uptime_success_ratio: self.preferences.uptime_success_ratio,
            online_window: self.preferences.online_window,
            ..Default::default()
        };
        self.db.known_unreliable_or_offline(&criteria, ids).await
    }

    /// Returns the piece indices of `pieces` whose holding nodes are unreliable or
    /// offline.
    pub async fn missing_pieces(
        &self,
        pieces: &[PieceRef],
    ) -> Result<Vec<PieceIndex>, OverlayError> {
        let ids: Vec<NodeId> = pieces.iter().map(|piece| piece.node_id).collect();
        let bad = self.known_unreliable_or_offline(&ids).await?;
        Ok(pieces
            .iter()
            .filter(|piece| bad.contains(&piece.node_id))
            .map(|piece| piece.piece_index)
            .collect())
    }
}

#[async_trait]
impl ContactObserver for Cache {
    async fn on_connection_success(&self, node: &Node) {
        if let Err(error) = self.put(node.id, node).await {
            tracing::debug!(%error, node_id = %node.id, "error updating node address");
        }
        if let Err(error) = self.update_uptime(node.id, true).await {
            tracing::debug!(%error, node_id = %node.id, "error updating node uptime");
        }
    }

    async fn on_connection_failure(&self, node_id: NodeId) {
        if let Err(error) = self.update_uptime(node_id, false).await {
            tracing::debug!(%error, %node_id, "error updating node uptime");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        time::{Duration, SystemTime},
    };

    use orbit_test_utils::async_param_test;

    use super::*;
    use crate::overlay::{MemOverlayDb, NodeCapacity, NodeType};

    fn node_id(tag: u8) -> NodeId {
        NodeId::new([tag; 32])
    }

    fn preferences() -> NodeSelectionConfig {
        NodeSelectionConfig {
            online_window: Duration::from_secs(3600),
            audit_count: 2,
            audit_success_ratio: 0.6,
            uptime_count: 2,
            uptime_success_ratio: 0.9,
            new_node_fraction: 0.0,
            reputation_alpha: 0.5,
            minimum_version: None,
        }
    }

    async fn cache_with_db(preferences: NodeSelectionConfig) -> (Cache, Arc<MemOverlayDb>) {
        let db = Arc::new(MemOverlayDb::new_with_seed(42));
        (Cache::new(db.clone(), preferences), db)
    }

    /// Registers a node and seeds its reputation.
    async fn seed_node(cache: &Cache, tag: u8, stats: NodeStats) -> NodeId {
        let id = node_id(tag);
        let node = Node::new(id, format!("node-{tag}.test:7777"));
        cache.put(id, &node).await.expect("address update succeeds");
        cache
            .update_node_info(
                id,
                &NodeInfo {
                    node_type: NodeType::Storage,
                    capacity: NodeCapacity {
                        free_disk: 1 << 30,
                        free_bandwidth: 1 << 30,
                    },
                    version: "1.0.0".to_string(),
                },
            )
            .await
            .expect("info update succeeds");
        cache
            .create_stats(id, Some(stats))
            .await
            .expect("stats update succeeds");
        id
    }

    fn good_stats() -> NodeStats {
        NodeStats {
            audit_count: 10,
            audit_success_count: 10,
            audit_success_ratio: 1.0,
            uptime_count: 10,
            uptime_success_count: 10,
            uptime_success_ratio: 1.0,
            last_contact_success: Some(SystemTime::now()),
            last_contact_failure: None,
        }
    }

    #[tokio::test]
    async fn get_rejects_the_zero_node() {
        let (cache, _) = cache_with_db(preferences()).await;
        assert!(matches!(
            cache.get(NodeId::ZERO).await,
            Err(OverlayError::EmptyNode)
        ));
    }

    #[tokio::test]
    async fn put_rejects_mismatched_ids() {
        let (cache, _) = cache_with_db(preferences()).await;
        let node = Node::new(node_id(1), "one.test:7777");
        assert!(matches!(
            cache.put(node_id(2), &node).await,
            Err(OverlayError::IdMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_nodes_are_not_reported_unreliable() {
        let (cache, _) = cache_with_db(preferences()).await;
        let bad = cache
            .known_unreliable_or_offline(&[node_id(9)])
            .await
            .expect("lookup succeeds");
        assert!(bad.is_empty());
    }

    async_param_test! {
        classification: [
            healthy: (good_stats(), false),
            offline_by_window: (NodeStats {
                last_contact_success: Some(SystemTime::now() - Duration::from_secs(7200)),
                ..good_stats()
            }, true),
            failure_after_success: (NodeStats {
                last_contact_failure: Some(SystemTime::now()),
                ..good_stats()
            }, true),
            never_contacted: (NodeStats {
                last_contact_success: None,
                ..good_stats()
            }, true),
            low_audit_ratio: (NodeStats { audit_success_ratio: 0.5, ..good_stats() }, true),
            low_uptime_ratio: (NodeStats { uptime_success_ratio: 0.8, ..good_stats() }, true),
            too_few_audits: (NodeStats { audit_count: 1, ..good_stats() }, true),
            too_few_uptime_checks: (NodeStats { uptime_count: 1, ..good_stats() }, true),
        ]
    }
    async fn classification(stats: NodeStats, expected_bad: bool) {
        let (cache, _) = cache_with_db(preferences()).await;
        let id = seed_node(&cache, 1, stats).await;

        let bad = cache
            .known_unreliable_or_offline(&[id])
            .await
            .expect("lookup succeeds");
        assert_eq!(bad.contains(&id), expected_bad);
    }

    #[tokio::test]
    async fn missing_pieces_maps_bad_nodes_to_piece_indices() {
        let (cache, _) = cache_with_db(preferences()).await;
        let good = seed_node(&cache, 1, good_stats()).await;
        let offline = seed_node(
            &cache,
            2,
            NodeStats {
                last_contact_success: None,
                ..good_stats()
            },
        )
        .await;

        let pieces = vec![
            PieceRef {
                piece_index: 0,
                node_id: good,
                hash: vec![],
            },
            PieceRef {
                piece_index: 7,
                node_id: offline,
                hash: vec![],
            },
        ];
        let missing = cache
            .missing_pieces(&pieces)
            .await
            .expect("lookup succeeds");
        assert_eq!(missing, vec![7]);
    }

    #[tokio::test]
    async fn selection_excludes_requested_nodes() {
        let (cache, _) = cache_with_db(preferences()).await;
        let mut ids = Vec::new();
        for tag in 1..=6 {
            ids.push(seed_node(&cache, tag, good_stats()).await);
        }

        let excluded = ids[0];
        let nodes = cache
            .find_storage_nodes(FindStorageNodesRequest {
                requested_count: 5,
                excluded: vec![excluded],
                ..Default::default()
            })
            .await
            .expect("enough nodes remain");
        assert_eq!(nodes.len(), 5);
        assert!(nodes.iter().all(|node| node.id != excluded));
    }

    #[tokio::test]
    async fn selection_fails_with_not_enough_nodes() {
        let (cache, _) = cache_with_db(preferences()).await;
        for tag in 1..=3 {
            seed_node(&cache, tag, good_stats()).await;
        }

        let error = cache
            .find_storage_nodes(FindStorageNodesRequest {
                requested_count: 5,
                ..Default::default()
            })
            .await
            .expect_err("three nodes cannot satisfy five");
        assert!(matches!(
            error,
            OverlayError::NotEnoughNodes {
                requested: 5,
                found: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn selection_mixes_in_new_nodes() {
        let mut prefs = preferences();
        prefs.new_node_fraction = 0.25;
        let (cache, _) = cache_with_db(prefs).await;

        for tag in 1..=8 {
            seed_node(&cache, tag, good_stats()).await;
        }
        // Two nodes below the audit floor: online and otherwise healthy, just new.
        let new_a = seed_node(&cache, 101, NodeStats { audit_count: 0, ..good_stats() }).await;
        let new_b = seed_node(&cache, 102, NodeStats { audit_count: 1, ..good_stats() }).await;

        let nodes = cache
            .find_storage_nodes(FindStorageNodesRequest {
                requested_count: 8,
                ..Default::default()
            })
            .await
            .expect("selection succeeds");

        assert_eq!(nodes.len(), 8);
        let selected: HashSet<NodeId> = nodes.iter().map(|node| node.id).collect();
        assert_eq!(selected.len(), 8, "no node is returned twice");
        let new_selected = [new_a, new_b]
            .iter()
            .filter(|id| selected.contains(id))
            .count();
        assert_eq!(new_selected, 2, "a quarter of eight slots go to new nodes");
    }

    #[tokio::test]
    async fn selection_order_varies_across_calls() {
        let (cache, _) = cache_with_db(preferences()).await;
        for tag in 1..=20 {
            seed_node(&cache, tag, good_stats()).await;
        }

        let request = || FindStorageNodesRequest {
            requested_count: 10,
            ..Default::default()
        };
        let first = cache.find_storage_nodes(request()).await.expect("selects");
        let second = cache.find_storage_nodes(request()).await.expect("selects");
        assert_ne!(
            first, second,
            "selection must not return a deterministic order"
        );
        let unique: HashSet<NodeId> = first.iter().map(|node| node.id).collect();
        assert_eq!(unique.len(), 10, "a selection never repeats a node");
    }

    #[tokio::test]
    async fn observer_feedback_updates_uptime() {
        let (cache, _) = cache_with_db(preferences()).await;
        let id = seed_node(&cache, 1, good_stats()).await;

        cache.on_connection_failure(id).await;
        let dossier = cache.get(id).await.expect("node exists");
        assert!(dossier.reputation.last_contact_failure.is_some());
        assert_eq!(dossier.reputation.uptime_count, 11);

        let node = dossier.node.clone();
        cache.on_connection_success(&node).await;
        let dossier = cache.get(id).await.expect("node exists");
        assert_eq!(dossier.reputation.uptime_count, 12);
        let success = dossier.reputation.last_contact_success.expect("was set");
        let failure = dossier.reputation.last_contact_failure.expect("was set");
        assert!(success >= failure);
    }
}
