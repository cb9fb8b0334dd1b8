// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! The repair checker: finds segments whose redundancy has degraded.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{effective_thresholds, RepairQueue};
use crate::{config::RepairConfig, metainfo, overlay::Cache};

/// Pointers examined per pointer-store page.
const SCAN_PAGE_SIZE: usize = 1000;

/// Periodically scans the pointer store and enqueues segments whose healthy-piece
/// count has fallen to the repair threshold.
pub struct Checker {
    metainfo: Arc<metainfo::Service>,
    overlay: Arc<Cache>,
    queue: Arc<RepairQueue>,
    config: RepairConfig,
}

impl std::fmt::Debug for Checker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Checker {
    /// Creates a new checker feeding `queue`.
    pub fn new(
        metainfo: Arc<metainfo::Service>,
        overlay: Arc<Cache>,
        queue: Arc<RepairQueue>,
        config: RepairConfig,
    ) -> Self {
        Self {
            metainfo,
            overlay,
            queue,
            config,
        }
    }

    /// Runs scan passes on the configured interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.checker_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("checker shutting down");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(error) = self.check_once().await {
                tracing::warn!(%error, "checker scan failed");
            }
        }
    }

    /// Scans the whole pointer store once. Returns the number of segments enqueued.
    #[tracing::instrument(skip(self))]
    pub async fn check_once(&self) -> Result<usize, metainfo::MetainfoError> {
        let mut enqueued = 0;
        let mut scanned = 0;
        let mut cursor = None;
        loop {
            let (page, more) = self
                .metainfo
                .iterate(cursor.as_ref(), SCAN_PAGE_SIZE)
                .await?;
            for (path, pointer) in &page {
                scanned += 1;
                if self.needs_repair(path, pointer).await && self.queue.push(path.clone()) {
                    enqueued += 1;
                }
            }
            if !more {
                break;
            }
            cursor = page.into_iter().last().map(|(path, _)| path);
        }
        tracing::debug!(scanned, enqueued, "checker scan complete");
        Ok(enqueued)
    }

    async fn needs_repair(&self, path: &str, pointer: &orbit_core::pointer::Pointer) -> bool {
        let Some((scheme, pieces)) = pointer.remote() else {
            return false;
        };
        let (repair_threshold, _) = effective_thresholds(scheme, &self.config);

        let missing = match self.overlay.missing_pieces(pieces).await {
            Ok(missing) => missing,
            Err(error) => {
                tracing::warn!(%error, path, "classifying pieces failed, skipping segment");
                return false;
            }
        };
        let healthy = pieces.len() - missing.len();
        if healthy <= usize::from(repair_threshold) {
            tracing::info!(
                path,
                healthy,
                repair_threshold,
                "segment fell to the repair threshold"
            );
            return true;
        }
        false
    }
}
