// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! The order issuer.
//!
//! Order limits are unforgeable capabilities: signed, bounded in bytes by the piece
//! size and in time by an expiry, each authorizing exactly one action on one piece at
//! one node. The issuer records every serial it hands out so double-spend is bounded.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::SystemTime,
};

use orbit_core::{
    keys::SatelliteKeyPair,
    messages::{Action, AddressedOrderLimit, BucketId, OrderLimit, SerialNumber},
    pointer::{PieceRef, RedundancyScheme},
    NodeId,
    SegmentPath,
    Node,
};
use tokio::sync::Mutex;

use crate::{config::OrderConfig, overlay::{Cache, OverlayError}};

/// Errors returned by the order issuer.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// Resolving a node address through the overlay failed.
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

/// Record of one issued order, kept until the order expires.
#[derive(Debug, Clone)]
struct IssuedOrder {
    action: Action,
    node_id: NodeId,
    not_after: SystemTime,
}

/// Issues signed order limits for repair traffic.
pub struct OrderService {
    keypair: SatelliteKeyPair,
    overlay: Arc<Cache>,
    config: OrderConfig,
    // Serial log for double-spend bounding; pruned on insertion.
    issued: Mutex<BTreeMap<SerialNumber, IssuedOrder>>,
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrderService {
    /// Creates a new order service signing with `keypair`.
    pub fn new(keypair: SatelliteKeyPair, overlay: Arc<Cache>, config: OrderConfig) -> Self {
        Self {
            keypair,
            overlay,
            config,
            issued: Mutex::new(BTreeMap::new()),
        }
    }

    /// The public key order limits verify under.
    pub fn public_key(&self) -> &orbit_core::PublicKey {
        self.keypair.public()
    }

    /// Creates `GET_REPAIR` orders for the healthy pieces of a segment.
    ///
    /// The result is aligned by piece index: slot `i` holds the order for piece `i`
    /// if piece `i` is healthy, `None` otherwise.
    pub async fn create_get_repair_orders(
        &self,
        path: &SegmentPath,
        bucket_id: &BucketId,
        scheme: &RedundancyScheme,
        segment_size: u64,
        healthy: &[PieceRef],
    ) -> Result<Vec<Option<AddressedOrderLimit>>, OrderError> {
        let piece_size = scheme.piece_size(segment_size);
        let not_after = SystemTime::now() + self.config.expiration;

        let mut orders = vec![None; usize::from(scheme.total)];
        for piece in healthy {
            let dossier = self.overlay.get(piece.node_id).await?;
            let order = self
                .issue(
                    Action::GetRepair,
                    path,
                    bucket_id,
                    piece.piece_index,
                    dossier.node,
                    piece_size,
                    not_after,
                )
                .await;
            orders[usize::from(piece.piece_index)] = Some(order);
        }
        Ok(orders)
    }

    /// Creates `PUT_REPAIR` orders for the piece indices missing from `get_orders`,
    /// mapped onto `new_nodes` in order.
    ///
    /// The result is aligned by piece index like `get_orders`. If there are fewer new
    /// nodes than missing indices, the remaining slots stay empty and the repair
    /// stores fewer pieces.
    pub async fn create_put_repair_orders(
        &self,
        path: &SegmentPath,
        bucket_id: &BucketId,
        scheme: &RedundancyScheme,
        segment_size: u64,
        get_orders: &[Option<AddressedOrderLimit>],
        new_nodes: &[Node],
    ) -> Result<Vec<Option<AddressedOrderLimit>>, OrderError> {
        let piece_size = scheme.piece_size(segment_size);
        let not_after = SystemTime::now() + self.config.expiration;

        let mut new_nodes = new_nodes.iter();
        let mut orders = vec![None; usize::from(scheme.total)];
        for piece_index in 0..scheme.total {
            if get_orders
                .get(usize::from(piece_index))
                .is_some_and(Option::is_some)
            {
                continue;
            }
            let Some(node) = new_nodes.next() else {
                break;
            };
            let order = self
                .issue(
                    Action::PutRepair,
                    path,
                    bucket_id,
                    piece_index,
                    node.clone(),
                    piece_size,
                    not_after,
                )
                .await;
            orders[usize::from(piece_index)] = Some(order);
        }
        Ok(orders)
    }

    /// The number of unexpired issued-order records currently held.
    pub async fn issued_order_count(&self) -> usize {
        self.issued.lock().await.len()
    }

    /// A snapshot of the unexpired issued-order records: serial, action, and the node
    /// the order was bound to.
    pub async fn issued_orders(&self) -> Vec<(SerialNumber, Action, NodeId)> {
        self.issued
            .lock()
            .await
            .iter()
            .map(|(serial, record)| (*serial, record.action, record.node_id))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn issue(
        &self,
        action: Action,
        path: &SegmentPath,
        bucket_id: &BucketId,
        piece_index: orbit_core::PieceIndex,
        node: Node,
        max_bytes: u64,
        not_after: SystemTime,
    ) -> AddressedOrderLimit {
        let serial = SerialNumber::generate_with_rng(&mut rand::thread_rng());
        let limit = OrderLimit {
            serial,
            action,
            segment_path: path.clone(),
            bucket_id: bucket_id.clone(),
            piece_index,
            node_id: node.id,
            max_bytes,
            not_after,
        };

        let now = SystemTime::now();
        let mut issued = self.issued.lock().await;
        issued.retain(|_, record| record.not_after > now);
        issued.insert(
            serial,
            IssuedOrder {
                action,
                node_id: node.id,
                not_after,
            },
        );
        drop(issued);

        AddressedOrderLimit {
            limit: self.keypair.sign_message(limit),
            node,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use orbit_core::pointer::PieceRef;

    use super::*;
    use crate::{
        config::NodeSelectionConfig,
        overlay::{MemOverlayDb, NodeStats},
    };

    fn scheme() -> RedundancyScheme {
        RedundancyScheme {
            required: 2,
            repair_threshold: 3,
            success_threshold: 4,
            total: 6,
            share_size: 256,
        }
    }

    async fn service_with_nodes(tags: &[u8]) -> OrderService {
        let db = Arc::new(MemOverlayDb::new_with_seed(1));
        let cache = Arc::new(Cache::new(db, NodeSelectionConfig::default()));
        for &tag in tags {
            let id = NodeId::new([tag; 32]);
            let node = Node::new(id, format!("node-{tag}.test:7777"));
            cache.put(id, &node).await.expect("address update succeeds");
            cache
                .create_stats(id, Some(NodeStats::default()))
                .await
                .expect("stats seeded");
        }
        OrderService::new(
            SatelliteKeyPair::generate(),
            cache,
            OrderConfig {
                expiration: Duration::from_secs(3600),
            },
        )
    }

    fn healthy_pieces(indices: &[u16], tag_offset: u8) -> Vec<PieceRef> {
        indices
            .iter()
            .map(|&piece_index| PieceRef {
                piece_index,
                node_id: NodeId::new([piece_index as u8 + tag_offset; 32]),
                hash: vec![],
            })
            .collect()
    }

    #[tokio::test]
    async fn get_orders_align_with_piece_indices() {
        let service = service_with_nodes(&[10, 11, 13]).await;
        let healthy = healthy_pieces(&[0, 1, 3], 10);
        let orders = service
            .create_get_repair_orders(
                &"p/s/b/obj".to_string(),
                &BucketId::new(b"p/b".to_vec()),
                &scheme(),
                1000,
                &healthy,
            )
            .await
            .expect("orders are issued");

        assert_eq!(orders.len(), 6);
        for (slot, order) in orders.iter().enumerate() {
            match slot {
                0 | 1 | 3 => {
                    let order = order.as_ref().expect("healthy slot has an order");
                    let limit = order.limit.limit();
                    assert_eq!(limit.action, Action::GetRepair);
                    assert_eq!(usize::from(limit.piece_index), slot);
                    assert_eq!(limit.max_bytes, scheme().piece_size(1000));
                    assert!(order.limit.verify(service.public_key()).is_ok());
                }
                _ => assert!(order.is_none()),
            }
        }
    }

    #[tokio::test]
    async fn put_orders_fill_the_missing_slots() {
        let service = service_with_nodes(&[10, 11, 13]).await;
        let healthy = healthy_pieces(&[0, 1, 3], 10);
        let path = "p/s/b/obj".to_string();
        let bucket = BucketId::new(b"p/b".to_vec());
        let get_orders = service
            .create_get_repair_orders(&path, &bucket, &scheme(), 1000, &healthy)
            .await
            .expect("get orders are issued");

        let new_nodes = vec![
            Node::new(NodeId::new([101; 32]), "new-1.test:7777"),
            Node::new(NodeId::new([102; 32]), "new-2.test:7777"),
            Node::new(NodeId::new([103; 32]), "new-3.test:7777"),
        ];
        let put_orders = service
            .create_put_repair_orders(&path, &bucket, &scheme(), 1000, &get_orders, &new_nodes)
            .await
            .expect("put orders are issued");

        // Missing piece indices are 2, 4, and 5; new nodes map onto them in order.
        let filled: Vec<usize> = put_orders
            .iter()
            .enumerate()
            .filter_map(|(slot, order)| order.as_ref().map(|_| slot))
            .collect();
        assert_eq!(filled, vec![2, 4, 5]);
        for (order, node) in put_orders.iter().flatten().zip(&new_nodes) {
            let limit = order.limit.limit();
            assert_eq!(limit.action, Action::PutRepair);
            assert_eq!(limit.node_id, node.id);
            assert_eq!(order.node.address, node.address);
        }
    }

    #[tokio::test]
    async fn fewer_new_nodes_leave_slots_empty() {
        let service = service_with_nodes(&[10, 11, 13]).await;
        let healthy = healthy_pieces(&[0, 1, 3], 10);
        let path = "p/s/b/obj".to_string();
        let bucket = BucketId::new(b"p/b".to_vec());
        let get_orders = service
            .create_get_repair_orders(&path, &bucket, &scheme(), 1000, &healthy)
            .await
            .expect("get orders are issued");

        let new_nodes = vec![Node::new(NodeId::new([101; 32]), "new-1.test:7777")];
        let put_orders = service
            .create_put_repair_orders(&path, &bucket, &scheme(), 1000, &get_orders, &new_nodes)
            .await
            .expect("put orders are issued");
        assert_eq!(put_orders.iter().flatten().count(), 1);
    }

    #[tokio::test]
    async fn issued_serials_are_recorded() {
        let service = service_with_nodes(&[10, 11]).await;
        let healthy = healthy_pieces(&[0, 1], 10);
        service
            .create_get_repair_orders(
                &"p/s/b/obj".to_string(),
                &BucketId::new(b"p/b".to_vec()),
                &scheme(),
                1000,
                &healthy,
            )
            .await
            .expect("orders are issued");
        assert_eq!(service.issued_order_count().await, 2);

        let records = service.issued_orders().await;
        assert!(records
            .iter()
            .all(|(_, action, _)| *action == Action::GetRepair));
        let bound_nodes: Vec<NodeId> = records.iter().map(|(_, _, node_id)| *node_id).collect();
        assert!(bound_nodes.contains(&NodeId::new([10; 32])));
        assert!(bound_nodes.contains(&NodeId::new([11; 32])));
    }

    #[tokio::test]
    async fn orders_for_unknown_nodes_fail() {
        let service = service_with_nodes(&[10]).await;
        let healthy = healthy_pieces(&[0, 1], 10);
        let result = service
            .create_get_repair_orders(
                &"p/s/b/obj".to_string(),
                &BucketId::new(b"p/b".to_vec()),
                &scheme(),
                1000,
                &healthy,
            )
            .await;
        assert!(matches!(
            result,
            Err(OrderError::Overlay(OverlayError::NodeNotFound(_)))
        ));
    }
}
