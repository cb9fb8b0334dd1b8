// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Segment pointers: the metadata record describing where a segment's pieces live.

use std::{collections::HashSet, time::SystemTime};

use serde::{Deserialize, Serialize};

use crate::{NodeId, PieceIndex};

/// The erasure-coding parameters of a remote segment.
///
/// Any `required` distinct shares suffice to reconstruct a stripe; fewer reveal
/// nothing useful. The thresholds satisfy
/// `required <= repair_threshold < success_threshold <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyScheme {
    /// `k`: the number of shares required to reconstruct a stripe.
    pub required: u16,
    /// `r`: at or below this many healthy pieces, the segment must be repaired.
    pub repair_threshold: u16,
    /// `s`: below this many pieces after a repair, durability was not restored.
    pub success_threshold: u16,
    /// `n`: the total number of shares produced per stripe.
    pub total: u16,
    /// The size of one erasure share in bytes. Must be 2-byte aligned.
    pub share_size: u32,
}

impl RedundancyScheme {
    /// Validates the scheme constraints.
    pub fn validate(&self) -> Result<(), InvalidRedundancyError> {
        if self.required == 0
            || self.required > self.repair_threshold
            || self.repair_threshold >= self.success_threshold
            || self.success_threshold > self.total
        {
            return Err(InvalidRedundancyError::Thresholds {
                required: self.required,
                repair: self.repair_threshold,
                success: self.success_threshold,
                total: self.total,
            });
        }
        if self.share_size == 0 || self.share_size % 2 != 0 {
            return Err(InvalidRedundancyError::ShareSize(self.share_size));
        }
        Ok(())
    }

    /// The number of bytes of original data carried by one stripe.
    pub fn stripe_size(&self) -> u64 {
        u64::from(self.required) * u64::from(self.share_size)
    }

    /// The number of stripes a segment of `segment_size` bytes occupies.
    pub fn stripe_count(&self, segment_size: u64) -> u64 {
        segment_size.div_ceil(self.stripe_size()).max(1)
    }

    /// The exact number of bytes each node stores for a segment of `segment_size`
    /// bytes. Deterministic; nodes and the satellite must agree on it.
    pub fn piece_size(&self, segment_size: u64) -> u64 {
        self.stripe_count(segment_size) * u64::from(self.share_size)
    }
}

/// Error returned when a [`RedundancyScheme`] violates its constraints.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidRedundancyError {
    /// The thresholds do not satisfy `0 < k <= r < s <= n`.
    #[error(
        "redundancy thresholds must satisfy 0 < k <= r < s <= n, \
         got k={required} r={repair} s={success} n={total}"
    )]
    Thresholds {
        /// `k`.
        required: u16,
        /// `r`.
        repair: u16,
        /// `s`.
        success: u16,
        /// `n`.
        total: u16,
    },
    /// The share size is zero or not 2-byte aligned.
    #[error("the share size must be positive and 2-byte aligned, got {0}")]
    ShareSize(u32),
}

/// One piece of a remote segment: which share it is, and which node holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceRef {
    /// The erasure-share index of this piece, in `[0, total)`.
    pub piece_index: PieceIndex,
    /// The node storing the piece.
    pub node_id: NodeId,
    /// The content hash the node signed when it accepted the piece.
    pub hash: Vec<u8>,
}

/// Where a segment's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentLocation {
    /// The segment is small enough that its bytes are stored in the pointer itself.
    Inline {
        /// The segment bytes.
        data: Vec<u8>,
    },
    /// The segment is erasure coded across storage nodes.
    Remote {
        /// The erasure-coding parameters.
        redundancy: RedundancyScheme,
        /// The pieces, ordered by insertion; piece indices are unique.
        pieces: Vec<PieceRef>,
    },
}

/// The metadata record for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointer {
    /// Where the segment bytes live.
    pub location: SegmentLocation,
    /// The size of the original segment in bytes.
    pub segment_size: u64,
    /// The instant after which the segment may be reclaimed, if any.
    pub expiration: Option<SystemTime>,
}

impl Pointer {
    /// Creates an inline pointer carrying the segment bytes directly.
    pub fn new_inline(data: Vec<u8>, expiration: Option<SystemTime>) -> Self {
        let segment_size = data.len() as u64;
        Self {
            location: SegmentLocation::Inline { data },
            segment_size,
            expiration,
        }
    }

    /// Creates a remote pointer for an erasure-coded segment.
    pub fn new_remote(
        redundancy: RedundancyScheme,
        pieces: Vec<PieceRef>,
        segment_size: u64,
        expiration: Option<SystemTime>,
    ) -> Self {
        Self {
            location: SegmentLocation::Remote { redundancy, pieces },
            segment_size,
            expiration,
        }
    }

    /// Returns true iff the segment bytes are stored inline.
    pub fn is_inline(&self) -> bool {
        matches!(self.location, SegmentLocation::Inline { .. })
    }

    /// The redundancy scheme and piece list, if this pointer is remote.
    pub fn remote(&self) -> Option<(&RedundancyScheme, &[PieceRef])> {
        match &self.location {
            SegmentLocation::Remote { redundancy, pieces } => Some((redundancy, pieces)),
            SegmentLocation::Inline { .. } => None,
        }
    }

    /// Validates the pointer invariants.
    ///
    /// Remote pointers must carry a valid redundancy scheme, at least `required`
    /// pieces, unique piece indices in `[0, total)`, and no more than `total` pieces.
    pub fn validate(&self) -> Result<(), InvalidPointerError> {
        let SegmentLocation::Remote { redundancy, pieces } = &self.location else {
            return Ok(());
        };
        redundancy.validate()?;
        if pieces.len() > usize::from(redundancy.total) {
            return Err(InvalidPointerError::TooManyPieces {
                pieces: pieces.len(),
                total: redundancy.total,
            });
        }
        if pieces.len() < usize::from(redundancy.required) {
            return Err(InvalidPointerError::TooFewPieces {
                pieces: pieces.len(),
                required: redundancy.required,
            });
        }
        let mut seen = HashSet::new();
        for piece in pieces {
            if piece.piece_index >= redundancy.total {
                return Err(InvalidPointerError::PieceIndexOutOfRange {
                    index: piece.piece_index,
                    total: redundancy.total,
                });
            }
            if !seen.insert(piece.piece_index) {
                return Err(InvalidPointerError::DuplicatePieceIndex(piece.piece_index));
            }
            if piece.node_id.is_zero() {
                return Err(InvalidPointerError::ZeroNodeId(piece.piece_index));
            }
        }
        Ok(())
    }
}

/// Error returned when a [`Pointer`] violates its invariants.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidPointerError {
    /// The redundancy scheme is invalid.
    #[error(transparent)]
    Redundancy(#[from] InvalidRedundancyError),
    /// The pointer carries more pieces than the scheme allows.
    #[error("pointer carries {pieces} pieces but the scheme allows at most {total}")]
    TooManyPieces {
        /// Number of pieces on the pointer.
        pieces: usize,
        /// `n`.
        total: u16,
    },
    /// The pointer carries fewer pieces than needed to reconstruct the segment.
    #[error("pointer carries {pieces} pieces but at least {required} are required")]
    TooFewPieces {
        /// Number of pieces on the pointer.
        pieces: usize,
        /// `k`.
        required: u16,
    },
    /// A piece index lies outside `[0, total)`.
    #[error("piece index {index} is out of range for a scheme with {total} shares")]
    PieceIndexOutOfRange {
        /// The offending index.
        index: PieceIndex,
        /// `n`.
        total: u16,
    },
    /// Two pieces carry the same index.
    #[error("duplicate piece index {0}")]
    DuplicatePieceIndex(PieceIndex),
    /// A piece names the invalid all-zero node.
    #[error("piece {0} names the zero node ID")]
    ZeroNodeId(PieceIndex),
}

#[cfg(test)]
mod tests {
    use orbit_test_utils::param_test;

    use super::*;

    fn scheme(required: u16, repair: u16, success: u16, total: u16) -> RedundancyScheme {
        RedundancyScheme {
            required,
            repair_threshold: repair,
            success_threshold: success,
            total,
            share_size: 256,
        }
    }

    fn pieces(indices: &[u16]) -> Vec<PieceRef> {
        indices
            .iter()
            .map(|&piece_index| PieceRef {
                piece_index,
                node_id: NodeId::new([piece_index as u8 + 1; 32]),
                hash: vec![0xee; 32],
            })
            .collect()
    }

    param_test! {
        scheme_validation: [
            valid: (scheme(4, 6, 8, 10), true),
            zero_required: (scheme(0, 6, 8, 10), false),
            required_above_repair: (scheme(7, 6, 8, 10), false),
            repair_not_below_success: (scheme(4, 8, 8, 10), false),
            success_above_total: (scheme(4, 6, 11, 10), false),
            minimal: (scheme(1, 1, 2, 2), true),
        ]
    }
    fn scheme_validation(scheme: RedundancyScheme, valid: bool) {
        assert_eq!(scheme.validate().is_ok(), valid);
    }

    #[test]
    fn odd_share_size_is_rejected() {
        let mut scheme = scheme(4, 6, 8, 10);
        scheme.share_size = 255;
        assert_eq!(
            scheme.validate(),
            Err(InvalidRedundancyError::ShareSize(255))
        );
    }

    param_test! {
        piece_size_is_a_share_multiple: [
            single_partial_stripe: (100, 256),
            exact_stripe: (1024, 256),
            one_byte_over: (1025, 512),
            many_stripes: (10_000, 2560),
            empty_segment: (0, 256),
        ]
    }
    fn piece_size_is_a_share_multiple(segment_size: u64, expected_piece_size: u64) {
        let scheme = scheme(4, 6, 8, 10);
        assert_eq!(scheme.piece_size(segment_size), expected_piece_size);
    }

    #[test]
    fn inline_pointer_is_always_valid() {
        let pointer = Pointer::new_inline(vec![1, 2, 3], None);
        assert!(pointer.validate().is_ok());
        assert!(pointer.is_inline());
        assert!(pointer.remote().is_none());
    }

    #[test]
    fn remote_pointer_validation() {
        let pointer = Pointer::new_remote(scheme(4, 6, 8, 10), pieces(&[0, 1, 2, 3, 4]), 4096, None);
        assert!(pointer.validate().is_ok());
    }

    param_test! {
        remote_pointer_rejects: [
            duplicate_index: (&[0, 1, 1, 3], "duplicate"),
            out_of_range_index: (&[0, 1, 2, 10], "out of range"),
            too_few_pieces: (&[0, 1, 2], "required"),
        ]
    }
    fn remote_pointer_rejects(indices: &[u16], fragment: &str) {
        let pointer = Pointer::new_remote(scheme(4, 6, 8, 10), pieces(indices), 4096, None);
        let error = pointer.validate().expect_err("pointer must be invalid");
        assert!(
            error.to_string().contains(fragment),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn zero_node_id_is_rejected() {
        let mut bad = pieces(&[0, 1, 2, 3]);
        bad[2].node_id = NodeId::ZERO;
        let pointer = Pointer::new_remote(scheme(4, 6, 8, 10), bad, 4096, None);
        assert_eq!(pointer.validate(), Err(InvalidPointerError::ZeroNodeId(2)));
    }
}
