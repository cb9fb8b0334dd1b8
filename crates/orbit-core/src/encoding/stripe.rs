// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};

use crate::{
    encoding::{DecodeError, EncodeError},
    pointer::RedundancyScheme,
    PieceIndex,
};

/// Encodes one stripe of `required * share_size` bytes into `total` shares.
///
/// Shares `0..required` carry the original data, shares `required..total` carry
/// recovery data.
pub fn encode_stripe(
    scheme: &RedundancyScheme,
    stripe: &[u8],
) -> Result<Vec<Vec<u8>>, EncodeError> {
    scheme.validate()?;
    if stripe.len() as u64 != scheme.stripe_size() {
        return Err(EncodeError::WrongStripeLength {
            got: stripe.len(),
            expected: scheme.stripe_size(),
        });
    }

    let share_size = scheme.share_size as usize;
    let recovery_count = usize::from(scheme.total - scheme.required);
    let mut encoder = ReedSolomonEncoder::new(
        usize::from(scheme.required),
        recovery_count,
        share_size,
    )?;
    for share in stripe.chunks(share_size) {
        encoder.add_original_shard(share)?;
    }

    let result = encoder.encode()?;
    Ok(stripe
        .chunks(share_size)
        .map(Vec::from)
        .chain(result.recovery_iter().map(Vec::from))
        .collect())
}

/// Reconstructs one stripe from any `required` distinct shares.
///
/// `shares` pairs each share with its index in `[0, total)`. Indices must be unique;
/// extra shares beyond `required` are accepted and used opportunistically.
pub fn decode_stripe(
    scheme: &RedundancyScheme,
    shares: &[(PieceIndex, &[u8])],
) -> Result<Vec<u8>, DecodeError> {
    scheme.validate()?;
    if shares.len() < usize::from(scheme.required) {
        return Err(DecodeError::InsufficientShares {
            available: shares.len(),
            required: scheme.required,
        });
    }

    let share_size = scheme.share_size as usize;
    let required = usize::from(scheme.required);
    let recovery_count = usize::from(scheme.total - scheme.required);

    let mut originals: Vec<Option<&[u8]>> = vec![None; required];
    let mut decoder = ReedSolomonDecoder::new(required, recovery_count, share_size)?;
    for &(index, data) in shares {
        if index >= scheme.total {
            return Err(DecodeError::InvalidShareIndex {
                index,
                total: scheme.total,
            });
        }
        if usize::from(index) < required {
            originals[usize::from(index)] = Some(data);
            decoder.add_original_shard(usize::from(index), data)?;
        } else {
            decoder.add_recovery_shard(usize::from(index) - required, data)?;
        }
    }

    let result = decoder.decode()?;
    let mut restored: Vec<Option<Vec<u8>>> = vec![None; required];
    for (index, share) in result.restored_original_iter() {
        restored[index] = Some(share.to_vec());
    }

    let mut stripe = Vec::with_capacity(required * share_size);
    for (index, original) in originals.iter().enumerate() {
        match (original, &restored[index]) {
            (Some(share), _) => stripe.extend_from_slice(share),
            (None, Some(share)) => stripe.extend_from_slice(share),
            (None, None) => {
                // The codec restores every missing original or errors out, so a hole
                // here means the caller provided an index twice.
                return Err(DecodeError::DuplicateShareIndex(index as PieceIndex));
            }
        }
    }
    Ok(stripe)
}
