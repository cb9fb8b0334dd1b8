// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Signed messages exchanged between the satellite and storage nodes.
//!
//! The only message the repair path cares about is the [`OrderLimit`]: a bounded,
//! time-limited capability authorizing a single action on a single piece at a single
//! node. Limits are signed by the satellite and verified by the node that serves the
//! request.

use std::{fmt, time::SystemTime};

use fastcrypto::{
    ed25519::Ed25519Signature,
    error::FastCryptoError,
    traits::VerifyingKey,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Node, NodeId, PieceIndex, PublicKey, SegmentPath};

/// The action an [`OrderLimit`] authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Download a piece on behalf of a client.
    Get,
    /// Upload a piece on behalf of a client.
    Put,
    /// Download a stripe share for auditing.
    GetAudit,
    /// Download a piece to reconstruct a degraded segment.
    GetRepair,
    /// Upload a replacement piece produced by repair.
    PutRepair,
    /// Delete a piece.
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Get => "GET",
            Action::Put => "PUT",
            Action::GetAudit => "GET_AUDIT",
            Action::GetRepair => "GET_REPAIR",
            Action::PutRepair => "PUT_REPAIR",
            Action::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Unique identifier of one issued order limit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SerialNumber([u8; 16]);

impl SerialNumber {
    /// Generates a fresh serial number using the provided RNG.
    pub fn generate_with_rng(rng: &mut impl rand::RngCore) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// The identifier of the bucket a segment belongs to, derived from its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId(Vec<u8>);

impl BucketId {
    /// Creates a bucket ID from its raw byte representation.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw bytes of the bucket ID.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A bounded capability authorizing `action` on piece `piece_index` of a segment,
/// served by node `node_id`.
///
/// Immutable once issued; the signature in the enclosing [`SignedOrderLimit`] binds
/// every field through the canonical BCS encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLimit {
    /// Unique serial, recorded by the issuer to bound double-spend.
    pub serial: SerialNumber,
    /// The authorized action.
    pub action: Action,
    /// The path of the segment the piece belongs to.
    pub segment_path: SegmentPath,
    /// The bucket the segment belongs to.
    pub bucket_id: BucketId,
    /// The index of the piece within the segment's piece set.
    pub piece_index: PieceIndex,
    /// The node authorized to serve the action.
    pub node_id: NodeId,
    /// Upper bound on the number of bytes the action may transfer.
    pub max_bytes: u64,
    /// The instant after which the order is no longer valid.
    pub not_after: SystemTime,
}

/// A message of type `T` together with the satellite's signature over its canonical
/// BCS encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage<T> {
    message: T,
    signature: Ed25519Signature,
}

impl<T> SignedMessage<T> {
    /// Creates a signed message from its parts. Use
    /// [`SatelliteKeyPair::sign_message`][crate::keys::SatelliteKeyPair::sign_message]
    /// to produce one with a valid signature.
    pub fn new(message: T, signature: Ed25519Signature) -> Self {
        Self { message, signature }
    }

    /// The signed message contents.
    pub fn message(&self) -> &T {
        &self.message
    }

    /// Consumes the wrapper and returns the message contents.
    pub fn into_message(self) -> T {
        self.message
    }

    /// The signature over the message.
    pub fn signature(&self) -> &Ed25519Signature {
        &self.signature
    }
}

impl<T: Serialize + DeserializeOwned> SignedMessage<T> {
    /// Verifies the signature on this message under `public_key`.
    pub fn verify(&self, public_key: &PublicKey) -> Result<(), MessageVerificationError> {
        let encoded =
            bcs::to_bytes(&self.message).expect("bcs encoding a message should not fail");
        public_key.verify(&encoded, &self.signature)?;
        Ok(())
    }
}

/// Error returned when the verification of a [`SignedMessage`] fails.
#[derive(Debug, thiserror::Error)]
pub enum MessageVerificationError {
    /// The message could not be encoded for verification.
    #[error(transparent)]
    Encode(#[from] bcs::Error),
    /// The signature does not match the message and public key.
    #[error(transparent)]
    Signature(#[from] FastCryptoError),
}

/// An [`OrderLimit`] signed by the satellite.
pub type SignedOrderLimit = SignedMessage<OrderLimit>;

impl SignedMessage<OrderLimit> {
    /// The signed order limit.
    pub fn limit(&self) -> &OrderLimit {
        &self.message
    }
}

/// A signed order limit together with the address of the node it is directed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressedOrderLimit {
    /// The signed limit the node will verify.
    pub limit: SignedOrderLimit,
    /// The node the action is directed at.
    pub node: Node,
}

impl AddressedOrderLimit {
    /// The piece index this limit is bound to.
    pub fn piece_index(&self) -> PieceIndex {
        self.limit.limit().piece_index
    }
}
