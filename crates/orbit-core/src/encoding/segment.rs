// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Read};

use tokio::sync::mpsc;

use crate::{
    encoding::{
        stripe::{decode_stripe, encode_stripe},
        DecodeError,
        EncodeError,
        StreamEncodeError,
    },
    pointer::RedundancyScheme,
    PieceIndex,
};

/// Encodes a whole segment held in memory into `total` pieces.
///
/// Piece `i` is the concatenation of share `i` of every stripe. The final stripe is
/// zero padded to the stripe size.
pub fn encode_segment(
    scheme: &RedundancyScheme,
    data: &[u8],
) -> Result<Vec<Vec<u8>>, EncodeError> {
    scheme.validate()?;
    if data.is_empty() {
        return Err(EncodeError::EmptyData);
    }
    tracing::trace!(segment_size = data.len(), "encoding segment");

    let stripe_size = scheme.stripe_size() as usize;
    let piece_size = scheme.piece_size(data.len() as u64) as usize;
    let mut pieces = vec![Vec::with_capacity(piece_size); usize::from(scheme.total)];
    let mut padded = Vec::new();
    for stripe in data.chunks(stripe_size) {
        let stripe = if stripe.len() == stripe_size {
            stripe
        } else {
            padded.clear();
            padded.extend_from_slice(stripe);
            padded.resize(stripe_size, 0);
            &padded
        };
        for (piece, share) in pieces.iter_mut().zip(encode_stripe(scheme, stripe)?) {
            piece.extend_from_slice(&share);
        }
    }
    Ok(pieces)
}

/// Builds a lazy reader over the original segment bytes from downloaded pieces.
///
/// `pieces` pairs each downloaded piece with its index. At least `required` distinct
/// pieces must be present, each exactly `piece_size(segment_size)` bytes long. The
/// returned [`SegmentReader`] decodes stripe by stripe on demand and yields exactly
/// `segment_size` bytes.
pub fn stream_decode(
    scheme: &RedundancyScheme,
    segment_size: u64,
    pieces: Vec<(PieceIndex, Vec<u8>)>,
) -> Result<SegmentReader, DecodeError> {
    SegmentReader::new(*scheme, segment_size, pieces)
}

/// A single-use, finite reader over a decoded segment.
///
/// Stripes are decoded lazily as the reader is consumed; the reader cannot be
/// restarted or seeked.
#[derive(Debug)]
pub struct SegmentReader {
    scheme: RedundancyScheme,
    pieces: Vec<(PieceIndex, Vec<u8>)>,
    next_stripe: u64,
    stripe_count: u64,
    remaining: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl SegmentReader {
    fn new(
        scheme: RedundancyScheme,
        segment_size: u64,
        pieces: Vec<(PieceIndex, Vec<u8>)>,
    ) -> Result<Self, DecodeError> {
        scheme.validate()?;

        let mut seen = std::collections::HashSet::new();
        let expected = scheme.piece_size(segment_size);
        for (index, data) in &pieces {
            if *index >= scheme.total {
                return Err(DecodeError::InvalidShareIndex {
                    index: *index,
                    total: scheme.total,
                });
            }
            if !seen.insert(*index) {
                return Err(DecodeError::DuplicateShareIndex(*index));
            }
            if data.len() as u64 != expected {
                return Err(DecodeError::WrongPieceSize {
                    index: *index,
                    got: data.len(),
                    expected,
                });
            }
        }
        if pieces.len() < usize::from(scheme.required) {
            return Err(DecodeError::InsufficientShares {
                available: pieces.len(),
                required: scheme.required,
            });
        }
        tracing::trace!(segment_size, pieces = pieces.len(), "creating a segment reader");

        Ok(Self {
            scheme,
            pieces,
            next_stripe: 0,
            stripe_count: scheme.stripe_count(segment_size),
            remaining: segment_size,
            buffer: Vec::new(),
            buffer_pos: 0,
        })
    }

    /// The number of bytes this reader has left to yield.
    pub fn remaining(&self) -> u64 {
        self.remaining + (self.buffer.len() - self.buffer_pos) as u64
    }

    /// Decodes the next stripe into the internal buffer. Returns false at the end of
    /// the segment.
    fn fill_buffer(&mut self) -> Result<bool, DecodeError> {
        if self.next_stripe == self.stripe_count || self.remaining == 0 {
            return Ok(false);
        }

        let share_size = self.scheme.share_size as usize;
        let offset = self.next_stripe as usize * share_size;
        let shares: Vec<(PieceIndex, &[u8])> = self
            .pieces
            .iter()
            .map(|(index, data)| (*index, &data[offset..offset + share_size]))
            .collect();

        let mut stripe = decode_stripe(&self.scheme, &shares)?;
        // The final stripe carries the zero padding; only the remaining segment
        // bytes are yielded.
        stripe.truncate(self.remaining.min(stripe.len() as u64) as usize);
        self.remaining -= stripe.len() as u64;
        self.next_stripe += 1;
        self.buffer = stripe;
        self.buffer_pos = 0;
        Ok(true)
    }
}

impl Read for SegmentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.buffer_pos == self.buffer.len() {
            match self.fill_buffer() {
                Ok(true) => break,
                Ok(false) => return Ok(0),
                Err(error) => return Err(io::Error::new(io::ErrorKind::InvalidData, error)),
            }
        }
        let n = buf.len().min(self.buffer.len() - self.buffer_pos);
        buf[..n].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + n]);
        self.buffer_pos += n;
        Ok(n)
    }
}

/// A lazy reader over the shares of a single piece produced by [`stream_encode`].
///
/// Each reader must be consumed concurrently with its siblings; the driver buffers at
/// most one stripe ahead of the slowest consumer.
#[derive(Debug)]
pub struct PieceReader {
    index: PieceIndex,
    shares: mpsc::Receiver<Vec<u8>>,
}

impl PieceReader {
    /// The piece index this reader yields shares for.
    pub fn piece_index(&self) -> PieceIndex {
        self.index
    }

    /// The next share of this piece, or `None` once the segment is exhausted.
    pub async fn next_share(&mut self) -> Option<Vec<u8>> {
        self.shares.recv().await
    }

    /// Collects the entire piece into memory.
    pub async fn read_to_end(mut self) -> Vec<u8> {
        let mut piece = Vec::new();
        while let Some(share) = self.next_share().await {
            piece.extend_from_slice(&share);
        }
        piece
    }
}

/// Drives [`stream_encode`] by pulling stripes from the source and fanning shares out
/// to the piece readers.
///
/// Must be polled (typically from a spawned task) for the piece readers to make
/// progress; dropping it ends every reader early.
#[derive(Debug)]
pub struct EncodeDriver<R> {
    scheme: RedundancyScheme,
    source: R,
    outputs: Vec<mpsc::Sender<Vec<u8>>>,
}

impl<R: Read> EncodeDriver<R> {
    /// Encodes the source to completion.
    pub async fn run(mut self) -> Result<(), StreamEncodeError> {
        let stripe_size = self.scheme.stripe_size() as usize;
        let mut stripe = vec![0u8; stripe_size];
        loop {
            let filled = read_up_to(&mut self.source, &mut stripe)?;
            if filled == 0 {
                return Ok(());
            }
            stripe[filled..].fill(0);

            let shares = encode_stripe(&self.scheme, &stripe).map_err(StreamEncodeError::from)?;
            for (output, share) in self.outputs.iter().zip(shares) {
                // A closed receiver means that consumer abandoned its piece; the
                // others still make progress.
                let _ = output.send(share).await;
            }
        }
    }
}

/// Reads from `source` until `buf` is full or the source is exhausted.
fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}

/// Splits a segment source into `total` lazily encoded piece readers.
///
/// The returned driver performs the actual encoding and must be run concurrently with
/// the consumption of the readers.
pub fn stream_encode<R: Read>(
    scheme: &RedundancyScheme,
    source: R,
) -> Result<(EncodeDriver<R>, Vec<PieceReader>), EncodeError> {
    scheme.validate()?;

    let mut outputs = Vec::with_capacity(usize::from(scheme.total));
    let mut readers = Vec::with_capacity(usize::from(scheme.total));
    for index in 0..scheme.total {
        // Capacity 1: the driver may run at most one stripe ahead of the slowest
        // consumer.
        let (tx, rx) = mpsc::channel(1);
        outputs.push(tx);
        readers.push(PieceReader { index, shares: rx });
    }

    Ok((
        EncodeDriver {
            scheme: *scheme,
            source,
            outputs,
        },
        readers,
    ))
}
