// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! The segment repair engine and the checker that feeds it.
//!
//! The [`checker::Checker`] scans the pointer store, classifies each segment's pieces
//! against the overlay, and enqueues segments whose healthy-piece count has fallen to
//! the repair threshold. The [`service::RepairService`] drains the queue with a
//! bounded worker pool; each job runs [`repairer::SegmentRepairer::repair`], which
//! reconstructs the segment from surviving pieces, uploads replacements to freshly
//! selected nodes, and atomically rewrites the pointer.

pub mod checker;
pub mod queue;
pub mod repairer;
pub mod service;

pub use checker::Checker;
pub use queue::{RepairJob, RepairQueue};
pub use repairer::{RepairError, RepairOutcome, RepairPhase, SegmentRepairer};
pub use service::RepairService;

use orbit_core::pointer::RedundancyScheme;

use crate::config::RepairConfig;

/// The repair and success thresholds in effect for a segment: the scheme's own
/// values unless the configuration overrides them.
pub(crate) fn effective_thresholds(scheme: &RedundancyScheme, config: &RepairConfig) -> (u16, u16) {
    (
        config.repair_threshold.unwrap_or(scheme.repair_threshold),
        config.success_threshold.unwrap_or(scheme.success_threshold),
    )
}
