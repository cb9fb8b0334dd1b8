// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Erasure encoding and decoding of segments.
//!
//! A segment is split into stripes of `required * share_size` bytes; each stripe is
//! expanded into `total` shares of `share_size` bytes with a Reed-Solomon code. Piece
//! `i` is the concatenation of share `i` of every stripe, so any `required` distinct
//! pieces reconstruct the segment. The final stripe is zero padded; the pad length is
//! recovered from the `segment_size` carried in the pointer.

mod errors;
mod segment;
mod stripe;

pub use errors::{DecodeError, EncodeError, StreamEncodeError};
pub use segment::{
    encode_segment,
    stream_decode,
    stream_encode,
    EncodeDriver,
    PieceReader,
    SegmentReader,
};
pub use stripe::{decode_stripe, encode_stripe};
