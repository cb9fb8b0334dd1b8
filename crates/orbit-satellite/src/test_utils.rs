// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the satellite's tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use orbit_core::{
    messages::AddressedOrderLimit,
    pointer::RedundancyScheme,
    Node,
    NodeId,
    PieceIndex,
};

use crate::{
    config::NodeSelectionConfig,
    overlay::{Cache, NodeCapacity, NodeInfo, NodeStats, NodeType},
    pieces::{PieceError, PieceStore},
};

/// The redundancy scheme the end-to-end repair tests run with.
pub(crate) fn test_scheme() -> RedundancyScheme {
    RedundancyScheme {
        required: 4,
        repair_threshold: 6,
        success_threshold: 8,
        total: 10,
        share_size: 64,
    }
}

/// Selection preferences matching the reputation seeded by [`seed_node`].
pub(crate) fn test_preferences() -> NodeSelectionConfig {
    NodeSelectionConfig {
        audit_count: 2,
        audit_success_ratio: 0.6,
        uptime_count: 2,
        uptime_success_ratio: 0.9,
        new_node_fraction: 0.0,
        reputation_alpha: 0.5,
        online_window: Duration::from_secs(3600),
        minimum_version: None,
    }
}

/// A node ID with a recognizable tag byte.
pub(crate) fn node_id(tag: u8) -> NodeId {
    NodeId::new([tag; 32])
}

/// Registers a storage node with solid reputation; `offline` nodes have never been
/// contacted successfully.
pub(crate) async fn seed_node(overlay: &Cache, id: NodeId, offline: bool) {
    let node = Node::new(id, format!("{id}.test:7777"));
    overlay.put(id, &node).await.expect("address update");
    overlay
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
        .expect("info update");
    overlay
        .create_stats(
            id,
            Some(NodeStats {
                audit_count: 10,
                audit_success_count: 10,
                audit_success_ratio: 1.0,
                uptime_count: 10,
                uptime_success_count: 10,
                uptime_success_ratio: 1.0,
                last_contact_success: (!offline).then(SystemTime::now),
                last_contact_failure: None,
            }),
        )
        .await
        .expect("stats update");
}

/// In-memory storage nodes for repair tests: serves pieces for configured nodes,
/// fails or stalls on request.
#[derive(Default)]
pub(crate) struct FakePieceStore {
    pieces: Mutex<HashMap<(NodeId, PieceIndex), Vec<u8>>>,
    failing: Mutex<HashSet<NodeId>>,
    stalling: Mutex<HashSet<NodeId>>,
}

impl FakePieceStore {
    pub fn store_piece(&self, node_id: NodeId, index: PieceIndex, data: Vec<u8>) {
        self.pieces.lock().unwrap().insert((node_id, index), data);
    }

    /// Makes every transfer against the node fail.
    pub fn fail(&self, node_id: NodeId) {
        self.failing.lock().unwrap().insert(node_id);
    }

    /// Makes every upload to the node hang until the client gives up.
    pub fn stall(&self, node_id: NodeId) {
        self.stalling.lock().unwrap().insert(node_id);
    }

    pub fn piece(&self, node_id: NodeId, index: PieceIndex) -> Option<Vec<u8>> {
        self.pieces.lock().unwrap().get(&(node_id, index)).cloned()
    }
}

#[async_trait]
impl PieceStore for FakePieceStore {
    async fn get_piece(&self, order: &AddressedOrderLimit) -> Result<Vec<u8>, PieceError> {
        let node_id = order.node.id;
        if self.failing.lock().unwrap().contains(&node_id) {
            return Err(PieceError::Dial("connection refused".into()));
        }
        self.piece(node_id, order.piece_index())
            .ok_or_else(|| PieceError::Rejected("piece not stored".into()))
    }

    async fn put_piece(
        &self,
        order: &AddressedOrderLimit,
        _expiration: Option<SystemTime>,
        piece: Vec<u8>,
    ) -> Result<Vec<u8>, PieceError> {
        let node_id = order.node.id;
        if self.failing.lock().unwrap().contains(&node_id) {
            return Err(PieceError::Dial("connection refused".into()));
        }
        if self.stalling.lock().unwrap().contains(&node_id) {
            // Far beyond any upload timeout; the client gives up first.
            tokio::time::sleep(Duration::from_secs(86400)).await;
        }
        let index = order.piece_index();
        self.store_piece(node_id, index, piece);
        Ok(vec![0xcd, index as u8])
    }
}
