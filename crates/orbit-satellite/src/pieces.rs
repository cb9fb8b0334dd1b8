// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Parallel piece transport between the satellite and storage nodes.
//!
//! The raw storage-node protocol sits behind the narrow [`PieceStore`] trait; this
//! module adds the erasure-coding fan-out on top of it: [`EcClient::get`] downloads
//! enough pieces to reconstruct a segment, [`EcClient::repair`] re-encodes a segment
//! and uploads replacement pieces. Every contact outcome is reported back to the
//! overlay through the [`ContactObserver`].

use std::{sync::Arc, time::Duration, time::SystemTime};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use orbit_core::{
    encoding::{stream_decode, stream_encode, DecodeError, SegmentReader, StreamEncodeError},
    messages::AddressedOrderLimit,
    pointer::RedundancyScheme,
    Node,
    NodeId,
    PieceIndex,
};
use tracing::Instrument;

/// Per-piece failure reported by a storage node or the connection to it.
#[derive(Debug, thiserror::Error)]
pub enum PieceError {
    /// The connection to the node could not be established.
    #[error("connection failed: {0}")]
    Dial(String),
    /// The node refused to serve the order.
    #[error("order rejected: {0}")]
    Rejected(String),
    /// The transfer did not complete in time.
    #[error("transfer timed out")]
    Timeout,
}

/// The opaque storage-node protocol: one download or upload against one node,
/// authorized by a signed order limit.
#[async_trait]
pub trait PieceStore: Send + Sync + 'static {
    /// Downloads the piece the order authorizes.
    async fn get_piece(&self, order: &AddressedOrderLimit) -> Result<Vec<u8>, PieceError>;

    /// Uploads a piece under the order and returns the node's signed content hash.
    async fn put_piece(
        &self,
        order: &AddressedOrderLimit,
        expiration: Option<SystemTime>,
        piece: Vec<u8>,
    ) -> Result<Vec<u8>, PieceError>;
}

/// Receives the outcome of every outbound node contact.
///
/// The overlay cache implements this to keep uptime bookkeeping current without the
/// transport holding a reference to the cache type itself.
#[async_trait]
pub trait ContactObserver: Send + Sync + 'static {
    /// A connection to `node` was established and served a request.
    async fn on_connection_success(&self, node: &Node);

    /// A connection to the node failed or was cut short.
    async fn on_connection_failure(&self, node_id: NodeId);
}

/// Errors returned by the erasure-coding transport client.
#[derive(Debug, thiserror::Error)]
pub enum EcError {
    /// Too few pieces could be downloaded, or the downloaded pieces do not decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Re-encoding the reconstructed segment failed.
    #[error(transparent)]
    Encode(#[from] StreamEncodeError),
}

/// Erasure-coding client: parallel piece I/O driving the codec.
#[derive(Clone)]
pub struct EcClient {
    store: Arc<dyn PieceStore>,
    observer: Arc<dyn ContactObserver>,
}

impl std::fmt::Debug for EcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcClient").finish_non_exhaustive()
    }
}

impl EcClient {
    /// Creates a client over the given transport and observer.
    pub fn new(store: Arc<dyn PieceStore>, observer: Arc<dyn ContactObserver>) -> Self {
        Self { store, observer }
    }

    /// Downloads pieces under `orders` and returns a lazy reader over the original
    /// segment bytes.
    ///
    /// `orders` is aligned by piece index; empty slots are skipped. Individual piece
    /// failures are tolerated as long as at least `required` pieces stream
    /// successfully; downloads still in flight once enough pieces have arrived are
    /// abandoned.
    #[tracing::instrument(skip_all, fields(segment_size = segment_size))]
    pub async fn get(
        &self,
        orders: &[Option<AddressedOrderLimit>],
        scheme: &RedundancyScheme,
        segment_size: u64,
    ) -> Result<SegmentReader, EcError> {
        let required = usize::from(scheme.required);
        let piece_size = scheme.piece_size(segment_size);
        let mut downloads: FuturesUnordered<_> = orders
            .iter()
            .flatten()
            .map(|order| self.download_piece(order, piece_size))
            .collect();

        let mut pieces: Vec<(PieceIndex, Vec<u8>)> = Vec::with_capacity(required);
        while let Some(result) = downloads.next().await {
            if let Some(piece) = result {
                pieces.push(piece);
                if pieces.len() >= required {
                    break;
                }
            }
        }
        drop(downloads);

        if pieces.len() < required {
            tracing::warn!(
                available = pieces.len(),
                required,
                "not enough pieces could be downloaded"
            );
        }
        Ok(stream_decode(scheme, segment_size, pieces)?)
    }

    async fn download_piece(
        &self,
        order: &AddressedOrderLimit,
        piece_size: u64,
    ) -> Option<(PieceIndex, Vec<u8>)> {
        let index = order.piece_index();
        let node = &order.node;
        match self.store.get_piece(order).await {
            Ok(data) if data.len() as u64 == piece_size => {
                self.observer.on_connection_success(node).await;
                Some((index, data))
            }
            Ok(data) => {
                tracing::warn!(
                    node_id = %node.id,
                    piece = index,
                    got = data.len(),
                    expected = piece_size,
                    "node returned a piece of the wrong size"
                );
                self.observer.on_connection_failure(node.id).await;
                None
            }
            Err(error) => {
                tracing::debug!(%error, node_id = %node.id, piece = index, "piece download failed");
                self.observer.on_connection_failure(node.id).await;
                None
            }
        }
    }

    /// Re-encodes the segment behind `reader` and uploads the pieces named by
    /// `orders` in parallel.
    ///
    /// `orders` is aligned by piece index; empty slots are skipped. Returns, per
    /// slot, the node that acknowledged the piece and the signed hash it returned. A
    /// slot is successful iff the node acknowledged before `timeout`.
    #[tracing::instrument(skip_all, fields(pieces = orders.iter().flatten().count()))]
    pub async fn repair(
        &self,
        orders: &[Option<AddressedOrderLimit>],
        scheme: &RedundancyScheme,
        reader: SegmentReader,
        expiration: Option<SystemTime>,
        timeout: Duration,
    ) -> Result<(Vec<Option<Node>>, Vec<Option<Vec<u8>>>), EcError> {
        let (driver, readers) = stream_encode(scheme, reader).map_err(StreamEncodeError::Encode)?;
        let driver = tokio::spawn(driver.run().in_current_span());

        let mut uploads: FuturesUnordered<_> = readers
            .into_iter()
            .zip(orders.iter())
            .filter_map(|(piece_reader, order)| {
                order
                    .as_ref()
                    .map(|order| self.upload_piece(order, expiration, piece_reader, timeout))
            })
            .collect();

        let mut nodes: Vec<Option<Node>> = vec![None; orders.len()];
        let mut hashes: Vec<Option<Vec<u8>>> = vec![None; orders.len()];
        while let Some((index, result)) = uploads.next().await {
            if let Some((node, hash)) = result {
                nodes[usize::from(index)] = Some(node);
                hashes[usize::from(index)] = Some(hash);
            }
        }

        driver
            .await
            .expect("the encode driver does not panic")
            .map_err(EcError::Encode)?;

        Ok((nodes, hashes))
    }

    async fn upload_piece(
        &self,
        order: &AddressedOrderLimit,
        expiration: Option<SystemTime>,
        mut piece_reader: orbit_core::encoding::PieceReader,
        timeout: Duration,
    ) -> (PieceIndex, Option<(Node, Vec<u8>)>) {
        let index = order.piece_index();
        let node = order.node.clone();

        let transfer = async {
            let mut piece = Vec::new();
            while let Some(share) = piece_reader.next_share().await {
                piece.extend_from_slice(&share);
            }
            self.store.put_piece(order, expiration, piece).await
        };

        match tokio::time::timeout(timeout, transfer).await {
            Ok(Ok(hash)) => {
                self.observer.on_connection_success(&node).await;
                (index, Some((node, hash)))
            }
            Ok(Err(error)) => {
                tracing::debug!(%error, node_id = %node.id, piece = index, "piece upload failed");
                self.observer.on_connection_failure(node.id).await;
                (index, None)
            }
            Err(_) => {
                tracing::debug!(node_id = %node.id, piece = index, "piece upload timed out");
                self.observer.on_connection_failure(node.id).await;
                (index, None)
            }
        }
    }
}

/// An observer that ignores every contact outcome. Useful for tests and tools that
/// run without an overlay.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

#[async_trait]
impl ContactObserver for NullObserver {
    async fn on_connection_success(&self, _node: &Node) {}

    async fn on_connection_failure(&self, _node_id: NodeId) {}
}
