// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::{pointer::InvalidRedundancyError, PieceIndex};

/// Error type returned when encoding fails.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The data to be encoded is empty.
    #[error("empty data cannot be encoded")]
    EmptyData,
    /// A stripe passed to the stripe encoder has the wrong length.
    #[error("a stripe must be exactly {expected} bytes, got {got}")]
    WrongStripeLength {
        /// The provided length.
        got: usize,
        /// `required * share_size`.
        expected: u64,
    },
    /// The redundancy scheme is invalid.
    #[error(transparent)]
    InvalidScheme(#[from] InvalidRedundancyError),
    /// The underlying Reed-Solomon codec returned an error.
    #[error(transparent)]
    Codec(#[from] reed_solomon_simd::Error),
}

/// Error type returned when feeding a byte stream through the encoder fails.
#[derive(Debug, Error)]
pub enum StreamEncodeError {
    /// Encoding a stripe failed.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Reading from the segment source failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error type returned when decoding fails.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Fewer than `required` distinct shares are available.
    #[error("{required} distinct shares are required to reconstruct, got {available}")]
    InsufficientShares {
        /// The number of distinct shares available.
        available: usize,
        /// `required`.
        required: u16,
    },
    /// A share index lies outside `[0, total)`.
    #[error("share index {index} is out of range for a scheme with {total} shares")]
    InvalidShareIndex {
        /// The offending index.
        index: PieceIndex,
        /// `n`.
        total: u16,
    },
    /// The same share index was provided twice.
    #[error("duplicate share index {0}")]
    DuplicateShareIndex(PieceIndex),
    /// A piece has a length inconsistent with the segment size and scheme.
    #[error("piece {index} is {got} bytes but the scheme requires {expected}")]
    WrongPieceSize {
        /// The index of the offending piece.
        index: PieceIndex,
        /// The provided length.
        got: usize,
        /// The expected piece size.
        expected: u64,
    },
    /// The redundancy scheme is invalid.
    #[error(transparent)]
    InvalidScheme(#[from] InvalidRedundancyError),
    /// The underlying Reed-Solomon codec returned an error.
    #[error(transparent)]
    Codec(#[from] reed_solomon_simd::Error),
}
