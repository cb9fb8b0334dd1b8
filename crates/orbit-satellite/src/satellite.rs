// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Assembly of the satellite's repair pipeline.

use std::sync::Arc;

use orbit_core::keys::SatelliteKeyPair;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SatelliteConfig,
    metainfo,
    orders::OrderService,
    overlay::{Cache, OverlayDb},
    pieces::{EcClient, PieceStore},
    repair::{Checker, RepairQueue, RepairService, SegmentRepairer},
};

/// A running satellite: the pointer store, the overlay cache, and the repair
/// pipeline, wired together from one configuration value.
///
/// The overlay backend and the storage-node transport are injected; everything else
/// is constructed here.
pub struct Satellite {
    metainfo: Arc<metainfo::Service>,
    overlay: Arc<Cache>,
    orders: Arc<OrderService>,
    queue: Arc<RepairQueue>,
    checker: Arc<Checker>,
    repair_service: Arc<RepairService>,
}

impl std::fmt::Debug for Satellite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Satellite").finish_non_exhaustive()
    }
}

impl Satellite {
    /// Builds a satellite from its configuration and injected collaborators.
    pub async fn new(
        config: SatelliteConfig,
        keypair: SatelliteKeyPair,
        overlay_db: Arc<dyn OverlayDb>,
        piece_store: Arc<dyn PieceStore>,
    ) -> Result<Self, metainfo::StoreError> {
        let metainfo = Arc::new(metainfo::Service::open(config.metainfo.clone()).await?);
        let overlay = Arc::new(Cache::new(overlay_db, config.node_selection.clone()));
        let orders = Arc::new(OrderService::new(
            keypair,
            overlay.clone(),
            config.orders.clone(),
        ));
        let ec = EcClient::new(piece_store, overlay.clone());

        let queue = Arc::new(RepairQueue::new(config.repair.queue_capacity));
        let repairer = Arc::new(SegmentRepairer::new(
            metainfo.clone(),
            orders.clone(),
            overlay.clone(),
            ec,
            config.repair.clone(),
        ));
        let checker = Arc::new(Checker::new(
            metainfo.clone(),
            overlay.clone(),
            queue.clone(),
            config.repair.clone(),
        ));
        let repair_service = Arc::new(RepairService::new(
            repairer,
            queue.clone(),
            config.repair.clone(),
        ));

        Ok(Self {
            metainfo,
            overlay,
            orders,
            queue,
            checker,
            repair_service,
        })
    }

    /// The pointer-store service.
    pub fn metainfo(&self) -> &Arc<metainfo::Service> {
        &self.metainfo
    }

    /// The overlay node-health cache.
    pub fn overlay(&self) -> &Arc<Cache> {
        &self.overlay
    }

    /// The order issuer.
    pub fn orders(&self) -> &Arc<OrderService> {
        &self.orders
    }

    /// The repair queue.
    pub fn repair_queue(&self) -> &Arc<RepairQueue> {
        &self.queue
    }

    /// Runs the checker and the repair workers until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let checker = self.checker.clone();
        let checker_cancel = cancel.clone();
        let checker_task =
            tokio::spawn(async move { checker.run(checker_cancel).await });

        let repair_task = tokio::spawn(self.repair_service.clone().run(cancel.clone()));

        cancel.cancelled().await;
        let _ = checker_task.await;
        let _ = repair_task.await;
        tracing::info!("satellite stopped");
    }
}
