// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! The segment repairer: reconstructs a degraded segment and rewrites its pointer.

use std::{
    collections::HashSet,
    future::Future,
    sync::Arc,
    time::Duration,
};

use orbit_core::{
    messages::BucketId,
    pointer::{PieceRef, Pointer, SegmentLocation},
    NodeId,
    PieceIndex,
    SegmentPath,
};
use tokio_util::sync::CancellationToken;

use super::effective_thresholds;
use crate::{
    config::RepairConfig,
    metainfo::{self, MetainfoError},
    orders::{OrderError, OrderService},
    overlay::{Cache, FindStorageNodesRequest, OverlayError},
    pieces::{EcClient, EcError},
};

/// How long a cancelled repair may still spend committing the rewritten pointer once
/// the replacement pieces are already uploaded.
const COMMIT_GRACE: Duration = Duration::from_secs(5);

/// The stage a repair is in; attached to errors for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPhase {
    /// Loading and validating the pointer.
    Loaded,
    /// Classifying pieces against the overlay.
    Classified,
    /// Issuing orders and selecting replacement nodes.
    Planned,
    /// Downloading surviving pieces and reconstructing the segment.
    Fetching,
    /// Uploading replacement pieces.
    Uploading,
    /// Committing the rewritten pointer.
    Committed,
    /// The repair was abandoned; uploaded pieces become orphans.
    Aborted,
}

/// The successful result of one repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The segment has recovered since it was enqueued; nothing was changed.
    NoRepairNeeded {
        /// The number of healthy pieces found.
        healthy: usize,
    },
    /// The pointer was rewritten with the repaired piece set.
    Repaired {
        /// The number of healthy pieces kept from the old pointer.
        healthy: usize,
        /// The number of replacement pieces stored.
        restored: usize,
    },
}

/// Errors returned by [`SegmentRepairer::repair`].
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// No pointer exists for the segment. Terminal.
    #[error("segment {path} not found")]
    NotFound {
        /// The segment path.
        path: SegmentPath,
    },
    /// The segment is stored inline and carries no pieces to repair. Terminal.
    #[error("cannot repair inline segment {path}")]
    NotRepairable {
        /// The segment path.
        path: SegmentPath,
    },
    /// The pointer's redundancy information is unusable. Terminal.
    #[error("segment {path} carries invalid redundancy: {source}")]
    InvalidRedundancy {
        /// The segment path.
        path: SegmentPath,
        /// What is wrong with the pointer.
        #[source]
        source: orbit_core::pointer::InvalidPointerError,
    },
    /// The segment path does not contain a bucket. Terminal.
    #[error("no bucket component in path {path}")]
    MalformedPath {
        /// The segment path.
        path: SegmentPath,
    },
    /// Too few nodes satisfy the selection criteria. Retryable.
    #[error("selecting repair targets for segment {path} failed: {source}")]
    NotEnoughNodes {
        /// The segment path.
        path: SegmentPath,
        /// The selection failure, including the criteria used.
        #[source]
        source: OverlayError,
    },
    /// An overlay lookup failed. Retryable.
    #[error("overlay lookup for segment {path} failed: {source}")]
    Overlay {
        /// The segment path.
        path: SegmentPath,
        /// The overlay failure.
        #[source]
        source: OverlayError,
    },
    /// Issuing order limits failed. Retryable.
    #[error("issuing orders for segment {path} failed: {source}")]
    Orders {
        /// The segment path.
        path: SegmentPath,
        /// The order failure.
        #[source]
        source: OrderError,
    },
    /// Too many pieces are already lost; the segment cannot be reconstructed.
    /// Terminal; surfaced to the operator.
    #[error("segment {path} is irrecoverable: {source}")]
    Irrecoverable {
        /// The segment path.
        path: SegmentPath,
        /// The reconstruction failure.
        #[source]
        source: EcError,
    },
    /// The repair stored fewer pieces than the success threshold; the pointer was not
    /// rewritten. Retryable.
    #[error(
        "repair of segment {path} stored {stored} pieces, below the success threshold {threshold}"
    )]
    InsufficientRepair {
        /// The segment path.
        path: SegmentPath,
        /// The piece count the rewrite would have had.
        stored: usize,
        /// The success threshold in effect.
        threshold: u16,
    },
    /// The repair was cancelled or ran out of time. Retryable.
    #[error("repair of segment {path} was cancelled in the {phase:?} phase")]
    Cancelled {
        /// The segment path.
        path: SegmentPath,
        /// The phase the repair was in.
        phase: RepairPhase,
    },
    /// The pointer store failed. Retryable.
    #[error("pointer store failed for segment {path} in the {phase:?} phase: {source}")]
    Store {
        /// The segment path.
        path: SegmentPath,
        /// The phase the repair was in.
        phase: RepairPhase,
        /// The store failure.
        #[source]
        source: MetainfoError,
    },
}

impl RepairError {
    /// Whether the job should be returned to the queue and retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepairError::NotFound { .. }
            | RepairError::NotRepairable { .. }
            | RepairError::InvalidRedundancy { .. }
            | RepairError::MalformedPath { .. }
            | RepairError::Irrecoverable { .. } => false,
            RepairError::NotEnoughNodes { .. }
            | RepairError::Overlay { .. }
            | RepairError::Orders { .. }
            | RepairError::InsufficientRepair { .. }
            | RepairError::Cancelled { .. }
            | RepairError::Store { .. } => true,
        }
    }

    /// The repair phase the failure occurred in.
    pub fn phase(&self) -> RepairPhase {
        match self {
            RepairError::NotFound { .. }
            | RepairError::NotRepairable { .. }
            | RepairError::InvalidRedundancy { .. } => RepairPhase::Loaded,
            RepairError::MalformedPath { .. } => RepairPhase::Classified,
            RepairError::NotEnoughNodes { .. }
            | RepairError::Overlay { .. }
            | RepairError::Orders { .. } => RepairPhase::Planned,
            RepairError::Irrecoverable { .. } => RepairPhase::Fetching,
            RepairError::InsufficientRepair { .. } => RepairPhase::Uploading,
            RepairError::Cancelled { phase, .. } => *phase,
            RepairError::Store { phase, .. } => *phase,
        }
    }
}

/// Derives the bucket identifier from a segment path.
///
/// The path splits on `/` into `{project_id, segment_marker, bucket_name, ...}`; the
/// bucket ID is `project_id/bucket_name`. Paths with fewer than three components have
/// no bucket.
pub fn create_bucket_id(path: &str) -> Option<BucketId> {
    let components: Vec<&str> = path.split('/').collect();
    if components.len() < 3 {
        return None;
    }
    Some(BucketId::new(
        format!("{}/{}", components[0], components[2]).into_bytes(),
    ))
}

/// Repairs one segment end-to-end: classify, fetch, reconstruct, upload, commit.
pub struct SegmentRepairer {
    metainfo: Arc<metainfo::Service>,
    orders: Arc<OrderService>,
    overlay: Arc<Cache>,
    ec: EcClient,
    config: RepairConfig,
}

impl std::fmt::Debug for SegmentRepairer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentRepairer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SegmentRepairer {
    /// Creates a new segment repairer.
    pub fn new(
        metainfo: Arc<metainfo::Service>,
        orders: Arc<OrderService>,
        overlay: Arc<Cache>,
        ec: EcClient,
        config: RepairConfig,
    ) -> Self {
        Self {
            metainfo,
            orders,
            overlay,
            ec,
            config,
        }
    }

    /// Retrieves an at-risk segment, reconstructs it from the surviving pieces, and
    /// stores replacement pieces on new nodes.
    ///
    /// A cancelled repair never commits a partial rewrite: cancellation before the
    /// upload completes aborts the repair, cancellation afterwards converts into a
    /// best-effort commit bounded by a short grace deadline.
    #[tracing::instrument(skip(self, cancel), fields(path = %path))]
    pub async fn repair(
        &self,
        path: &SegmentPath,
        cancel: &CancellationToken,
    ) -> Result<RepairOutcome, RepairError> {
        // Load the segment pointer from the metainfo.
        let pointer = self
            .cancellable(cancel, path, RepairPhase::Loaded, self.metainfo.get(path))
            .await?
            .map_err(|error| match error {
                MetainfoError::NotFound(_) => RepairError::NotFound { path: path.clone() },
                other => RepairError::Store {
                    path: path.clone(),
                    phase: RepairPhase::Loaded,
                    source: other,
                },
            })?;

        let Some((scheme, pieces)) = pointer.remote() else {
            return Err(RepairError::NotRepairable { path: path.clone() });
        };
        pointer
            .validate()
            .map_err(|source| RepairError::InvalidRedundancy {
                path: path.clone(),
                source,
            })?;
        let scheme = *scheme;
        let pieces = pieces.to_vec();
        let piece_size = scheme.piece_size(pointer.segment_size);
        let (repair_threshold, success_threshold) = effective_thresholds(&scheme, &self.config);

        // Classify the pieces against a fresh view of the overlay.
        let missing = self
            .cancellable(
                cancel,
                path,
                RepairPhase::Classified,
                self.overlay.missing_pieces(&pieces),
            )
            .await?
            .map_err(|source| RepairError::Overlay {
                path: path.clone(),
                source,
            })?;
        let missing: HashSet<PieceIndex> = missing.into_iter().collect();

        // Every node on the pointer is excluded from new-node selection, healthy or
        // not: a node may hold at most one piece of a segment.
        let mut excluded: Vec<NodeId> = Vec::with_capacity(pieces.len());
        let mut healthy: Vec<PieceRef> = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            excluded.push(piece.node_id);
            if !missing.contains(&piece.piece_index) {
                healthy.push(piece.clone());
            }
        }
        let healthy_count = healthy.len();

        // The checker may race the engine; re-check against the fresh classification
        // and no-op if the segment has recovered.
        if healthy_count >= usize::from(scheme.required)
            && healthy_count > usize::from(repair_threshold)
        {
            tracing::debug!(healthy = healthy_count, "no repair needed");
            return Ok(RepairOutcome::NoRepairNeeded {
                healthy: healthy_count,
            });
        }

        let bucket_id =
            create_bucket_id(path).ok_or_else(|| RepairError::MalformedPath { path: path.clone() })?;

        let get_orders = self
            .cancellable(
                cancel,
                path,
                RepairPhase::Planned,
                self.orders.create_get_repair_orders(
                    path,
                    &bucket_id,
                    &scheme,
                    pointer.segment_size,
                    &healthy,
                ),
            )
            .await?
            .map_err(|source| RepairError::Orders {
                path: path.clone(),
                source,
            })?;

        let request = FindStorageNodesRequest {
            requested_count: usize::from(scheme.total) - healthy_count,
            free_bandwidth: piece_size,
            free_disk: piece_size,
            excluded,
            ..Default::default()
        };
        let new_nodes = self
            .cancellable(
                cancel,
                path,
                RepairPhase::Planned,
                self.overlay.find_storage_nodes(request),
            )
            .await?
            .map_err(|source| match source {
                OverlayError::NotEnoughNodes { .. } => RepairError::NotEnoughNodes {
                    path: path.clone(),
                    source,
                },
                other => RepairError::Overlay {
                    path: path.clone(),
                    source: other,
                },
            })?;

        let put_orders = self
            .cancellable(
                cancel,
                path,
                RepairPhase::Planned,
                self.orders.create_put_repair_orders(
                    path,
                    &bucket_id,
                    &scheme,
                    pointer.segment_size,
                    &get_orders,
                    &new_nodes,
                ),
            )
            .await?
            .map_err(|source| RepairError::Orders {
                path: path.clone(),
                source,
            })?;

        // Download the segment using just the healthy pieces. The reader is
        // single-use and consumed entirely by the repair upload.
        let reader = self
            .cancellable(
                cancel,
                path,
                RepairPhase::Fetching,
                self.ec.get(&get_orders, &scheme, pointer.segment_size),
            )
            .await?
            .map_err(|source| RepairError::Irrecoverable {
                path: path.clone(),
                source,
            })?;

        let (successful_nodes, hashes) = self
            .cancellable(
                cancel,
                path,
                RepairPhase::Uploading,
                self.ec.repair(
                    &put_orders,
                    &scheme,
                    reader,
                    pointer.expiration,
                    self.config.timeout,
                ),
            )
            .await?
            .map_err(|source| RepairError::Irrecoverable {
                path: path.clone(),
                source,
            })?;

        // Keep the healthy pieces and append every successfully uploaded slot.
        let mut new_pieces = healthy;
        for (slot, (node, hash)) in successful_nodes.iter().zip(&hashes).enumerate() {
            let (Some(node), Some(hash)) = (node, hash) else {
                continue;
            };
            new_pieces.push(PieceRef {
                piece_index: slot as PieceIndex,
                node_id: node.id,
                hash: hash.clone(),
            });
        }

        // Never destroy the old piece list unless the rewrite strictly improves
        // durability.
        if new_pieces.len() < usize::from(success_threshold) {
            return Err(RepairError::InsufficientRepair {
                path: path.clone(),
                stored: new_pieces.len(),
                threshold: success_threshold,
            });
        }
        let restored = new_pieces.len() - healthy_count;

        let repaired = Pointer {
            location: SegmentLocation::Remote {
                redundancy: scheme,
                pieces: new_pieces,
            },
            segment_size: pointer.segment_size,
            expiration: pointer.expiration,
        };

        // The pieces are uploaded; committing strictly improves durability even if
        // the repair has been cancelled in the meantime, so the commit gets a short
        // grace deadline of its own.
        let commit = self.metainfo.put(path, &repaired);
        tokio::pin!(commit);
        let committed = tokio::select! {
            result = &mut commit => result,
            _ = cancel.cancelled() => {
                match tokio::time::timeout(COMMIT_GRACE, &mut commit).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("cancelled before the pointer rewrite; orphaning uploads");
                        return Err(RepairError::Cancelled {
                            path: path.clone(),
                            phase: RepairPhase::Aborted,
                        });
                    }
                }
            }
        };
        committed.map_err(|source| RepairError::Store {
            path: path.clone(),
            phase: RepairPhase::Committed,
            source,
        })?;

        tracing::info!(healthy = healthy_count, restored, "segment repaired");
        Ok(RepairOutcome::Repaired {
            healthy: healthy_count,
            restored,
        })
    }

    /// Runs `operation` unless the repair is cancelled first.
    async fn cancellable<T>(
        &self,
        cancel: &CancellationToken,
        path: &SegmentPath,
        phase: RepairPhase,
        operation: impl Future<Output = T>,
    ) -> Result<T, RepairError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(RepairError::Cancelled {
                path: path.clone(),
                phase,
            }),
            value = operation => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use orbit_core::{
        encoding::{encode_segment, DecodeError},
        keys::SatelliteKeyPair,
    };
    use orbit_test_utils::{param_test, random_data};

    use super::*;
    use crate::{
        config::{MetainfoConfig, OrderConfig},
        metainfo::{MemPointerDb, Service},
        overlay::MemOverlayDb,
        test_utils::{node_id, seed_node, test_preferences, test_scheme, FakePieceStore},
    };

    param_test! {
        bucket_id_uses_first_and_third_components: [
            minimal: ("project/s0/bucket", Some("project/bucket")),
            with_object: ("project/s0/bucket/a/b/c", Some("project/bucket")),
            empty_marker: ("project//bucket", Some("project/bucket")),
            two_components: ("just-two/components", None),
            one_component: ("alone", None),
        ]
    }
    fn bucket_id_uses_first_and_third_components(path: &str, expected: Option<&str>) {
        let bucket = create_bucket_id(path);
        assert_eq!(
            bucket.as_ref().map(|bucket| bucket.as_bytes()),
            expected.map(|expected| expected.as_bytes())
        );
    }

    struct Harness {
        repairer: SegmentRepairer,
        metainfo: Arc<Service>,
        overlay: Arc<Cache>,
        store: Arc<FakePieceStore>,
        path: SegmentPath,
        pointer: Pointer,
        data: Vec<u8>,
    }

    impl Harness {
        /// Builds a repairable world: a segment with ten pieces on nodes 1..=10, the
        /// first `offline` of which are offline, plus `spare` fresh nodes 101..
        /// eligible for selection.
        async fn new(offline: usize, spare: usize) -> Self {
            Self::new_at_path("project/s0/bucket/object".to_string(), offline, spare).await
        }

        async fn new_at_path(path: SegmentPath, offline: usize, spare: usize) -> Self {
            let overlay = Arc::new(Cache::new(
                Arc::new(MemOverlayDb::new_with_seed(7)),
                test_preferences(),
            ));

            let metainfo = Arc::new(Service::new(
                Box::new(MemPointerDb::default()),
                MetainfoConfig::default(),
            ));

            let orders = Arc::new(OrderService::new(
                SatelliteKeyPair::generate(),
                overlay.clone(),
                OrderConfig::default(),
            ));

            let store = Arc::new(FakePieceStore::default());
            let ec = EcClient::new(store.clone(), overlay.clone());

            let config = RepairConfig {
                timeout: Duration::from_secs(10),
                ..Default::default()
            };
            let repairer = SegmentRepairer::new(
                metainfo.clone(),
                orders,
                overlay.clone(),
                ec,
                config,
            );

            // The segment: ten pieces on nodes 1..=10.
            let data = random_data(4096);
            let pieces = encode_segment(&test_scheme(), &data).expect("encodes");
            let mut piece_refs = Vec::new();
            for (index, piece) in pieces.into_iter().enumerate() {
                let index = index as PieceIndex;
                let id = node_id(index as u8 + 1);
                store.store_piece(id, index, piece);
                piece_refs.push(PieceRef {
                    piece_index: index,
                    node_id: id,
                    hash: vec![0xaa, index as u8],
                });
            }

            for (position, piece) in piece_refs.iter().enumerate() {
                seed_node(&overlay, piece.node_id, position < offline).await;
            }
            for tag in 0..spare {
                seed_node(&overlay, node_id(101 + tag as u8), false).await;
            }

            let pointer = Pointer::new_remote(test_scheme(), piece_refs, data.len() as u64, None);
            metainfo.put(&path, &pointer).await.expect("seeds pointer");

            Self {
                repairer,
                metainfo,
                overlay,
                store,
                path,
                pointer,
                data,
            }
        }

        async fn repair(&self) -> Result<RepairOutcome, RepairError> {
            self.repairer
                .repair(&self.path, &CancellationToken::new())
                .await
        }

        async fn stored_pointer(&self) -> Pointer {
            self.metainfo.get(&self.path).await.expect("pointer exists")
        }

        fn original_node_ids(&self) -> HashSet<NodeId> {
            let (_, pieces) = self.pointer.remote().expect("remote pointer");
            pieces.iter().map(|piece| piece.node_id).collect()
        }
    }

    #[tokio::test]
    async fn s1_healthy_segment_is_a_noop() {
        let harness = Harness::new(1, 0).await;
        let outcome = harness.repair().await.expect("repair succeeds");
        assert_eq!(outcome, RepairOutcome::NoRepairNeeded { healthy: 9 });
        assert_eq!(harness.stored_pointer().await, harness.pointer);
    }

    #[tokio::test]
    async fn s2_normal_repair_restores_all_pieces() {
        let harness = Harness::new(5, 5).await;
        let outcome = harness.repair().await.expect("repair succeeds");
        assert_eq!(
            outcome,
            RepairOutcome::Repaired {
                healthy: 5,
                restored: 5
            }
        );

        let repaired = harness.stored_pointer().await;
        let (_, pieces) = repaired.remote().expect("remote pointer");
        assert_eq!(pieces.len(), 10);

        // Invariant: piece indices are unique and in range.
        let indices: HashSet<PieceIndex> = pieces.iter().map(|piece| piece.piece_index).collect();
        assert_eq!(indices.len(), 10);
        assert!(indices.iter().all(|&index| index < 10));

        // The five old healthy pieces survive unchanged.
        let (_, original) = harness.pointer.remote().expect("remote pointer");
        for old in &original[5..] {
            assert!(pieces.contains(old), "healthy piece {old:?} must survive");
        }

        // The five replacements live on spare nodes, disjoint from every node that
        // was on the pointer.
        let originals = harness.original_node_ids();
        let replacements: Vec<&PieceRef> = pieces
            .iter()
            .filter(|piece| !original.contains(*piece))
            .collect();
        assert_eq!(replacements.len(), 5);
        for piece in replacements {
            assert!(!originals.contains(&piece.node_id));
            assert_eq!(piece.hash, vec![0xcd, piece.piece_index as u8]);
        }

        // The rewritten piece set decodes back to the original segment.
        let stored: Vec<(PieceIndex, Vec<u8>)> = pieces
            .iter()
            .map(|piece| {
                let data = harness
                    .store
                    .piece(piece.node_id, piece.piece_index)
                    .expect("piece is stored");
                (piece.piece_index, data)
            })
            .collect();
        let mut reader = orbit_core::encoding::stream_decode(
            &test_scheme(),
            harness.data.len() as u64,
            stored,
        )
        .expect("decodes");
        let mut decoded = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut decoded).expect("reads");
        assert_eq!(decoded, harness.data);
    }

    #[tokio::test(start_paused = true)]
    async fn s3_partial_repair_meeting_the_threshold_commits() {
        let harness = Harness::new(5, 5).await;
        harness.store.stall(node_id(101));
        harness.store.stall(node_id(102));

        let outcome = harness.repair().await.expect("repair succeeds");
        assert_eq!(
            outcome,
            RepairOutcome::Repaired {
                healthy: 5,
                restored: 3
            }
        );
        let repaired = harness.stored_pointer().await;
        let (_, pieces) = repaired.remote().expect("remote pointer");
        assert_eq!(pieces.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn s4_partial_repair_below_the_threshold_fails() {
        let harness = Harness::new(5, 5).await;
        harness.store.stall(node_id(101));
        harness.store.stall(node_id(102));
        harness.store.stall(node_id(103));

        let error = harness.repair().await.expect_err("repair must fail");
        assert!(matches!(
            error,
            RepairError::InsufficientRepair {
                stored: 7,
                threshold: 8,
                ..
            }
        ));
        assert!(error.is_retryable());
        assert_eq!(error.phase(), RepairPhase::Uploading);
        assert_eq!(
            harness.stored_pointer().await,
            harness.pointer,
            "the pointer must not be rewritten"
        );
    }

    #[tokio::test]
    async fn s5_too_many_lost_pieces_is_irrecoverable() {
        let harness = Harness::new(7, 7).await;
        let error = harness.repair().await.expect_err("repair must fail");
        assert!(matches!(error, RepairError::Irrecoverable { .. }));
        assert!(!error.is_retryable());
        if let RepairError::Irrecoverable { source, .. } = &error {
            assert!(matches!(
                source,
                EcError::Decode(DecodeError::InsufficientShares {
                    available: 3,
                    required: 4
                })
            ));
        }
        assert_eq!(harness.stored_pointer().await, harness.pointer);
    }

    #[tokio::test]
    async fn s6_paths_without_a_bucket_are_malformed() {
        let harness = Harness::new_at_path("just-two/components".to_string(), 5, 5).await;
        let error = harness.repair().await.expect_err("repair must fail");
        assert!(matches!(error, RepairError::MalformedPath { .. }));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn unknown_segments_are_not_found() {
        let harness = Harness::new(5, 5).await;
        let error = harness
            .repairer
            .repair(&"project/s0/bucket/other".to_string(), &CancellationToken::new())
            .await
            .expect_err("repair must fail");
        assert!(matches!(error, RepairError::NotFound { .. }));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn inline_segments_are_not_repairable() {
        let harness = Harness::new(5, 5).await;
        let path = "project/s0/bucket/inline".to_string();
        harness
            .metainfo
            .put(&path, &Pointer::new_inline(vec![1, 2, 3], None))
            .await
            .expect("puts");

        let error = harness
            .repairer
            .repair(&path, &CancellationToken::new())
            .await
            .expect_err("repair must fail");
        assert!(matches!(error, RepairError::NotRepairable { .. }));
    }

    #[tokio::test]
    async fn too_few_replacement_nodes_is_retryable() {
        let harness = Harness::new(5, 3).await;
        let error = harness.repair().await.expect_err("repair must fail");
        assert!(matches!(error, RepairError::NotEnoughNodes { .. }));
        assert!(error.is_retryable());
        assert_eq!(error.phase(), RepairPhase::Planned);
        assert_eq!(harness.stored_pointer().await, harness.pointer);
    }

    #[tokio::test]
    async fn failed_downloads_are_tolerated_above_the_minimum() {
        // Five healthy pieces, one of which fails to download; four remain, which is
        // exactly enough to reconstruct.
        let harness = Harness::new(5, 5).await;
        harness.store.fail(node_id(10));

        let outcome = harness.repair().await.expect("repair succeeds");
        assert!(matches!(outcome, RepairOutcome::Repaired { .. }));
    }

    #[tokio::test]
    async fn cancelled_repairs_do_not_commit() {
        let harness = Harness::new(5, 5).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = harness
            .repairer
            .repair(&harness.path, &cancel)
            .await
            .expect_err("repair must fail");
        assert!(matches!(error, RepairError::Cancelled { .. }));
        assert!(error.is_retryable());
        assert_eq!(harness.stored_pointer().await, harness.pointer);
    }

    #[tokio::test]
    async fn repair_records_contact_outcomes() {
        let harness = Harness::new(5, 5).await;
        harness.store.fail(node_id(6));

        harness.repair().await.expect("repair succeeds");

        let dossier = harness.overlay.get(node_id(6)).await.expect("node exists");
        assert!(
            dossier.reputation.last_contact_failure.is_some(),
            "the failed download must be reported to the overlay"
        );
    }
}
