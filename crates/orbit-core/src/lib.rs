// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Core functionality for the orbit storage platform.
//!
//! This crate holds the types shared between the satellite and its collaborators: node
//! identifiers, segment pointers and redundancy schemes, signed order limits, and the
//! erasure codec used to reconstruct segments from surviving pieces.

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod keys;
pub mod messages;
pub mod pointer;

/// Erasure encoding and decoding.
pub mod encoding;

/// The index of an erasure share within a segment's piece set.
pub type PieceIndex = u16;

/// The public key signed messages verify under.
pub type PublicKey = fastcrypto::ed25519::Ed25519PublicKey;

/// The path identifying a segment in the pointer store.
pub type SegmentPath = String;

/// Identifier of a node in the overlay network.
///
/// A distinguished all-zero value exists but never identifies a real node; APIs reject
/// it explicitly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// The number of bytes in a node ID.
    pub const LENGTH: usize = 32;

    /// The all-zero node ID, used as a sentinel for "no node".
    pub const ZERO: NodeId = NodeId([0; Self::LENGTH]);

    /// Creates a node ID from its raw bytes.
    pub const fn new(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns true iff this is the invalid all-zero node ID.
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// The raw bytes of the node ID.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }

    /// Generates a random node ID using the provided RNG.
    pub fn generate_with_rng(rng: &mut impl rand::RngCore) -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl From<[u8; NodeId::LENGTH]> for NodeId {
    fn from(bytes: [u8; NodeId::LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeId({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Error returned when parsing a [`NodeId`] from a string fails.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("a node ID must be exactly 64 hex characters")]
pub struct NodeIdParseError;

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 * Self::LENGTH {
            return Err(NodeIdParseError);
        }
        let mut bytes = [0u8; Self::LENGTH];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16).map_err(|_| NodeIdParseError)?;
        }
        Ok(Self(bytes))
    }
}

/// A node as seen by the satellite: its identifier and its dialable address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// The node's identifier.
    pub id: NodeId,
    /// The `host:port` address the node listens on.
    pub address: String,
}

impl Node {
    /// Creates a new node record.
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use orbit_test_utils::param_test;

    use super::*;

    #[test]
    fn zero_node_id_is_zero() {
        assert!(NodeId::ZERO.is_zero());
        assert!(!NodeId::new([1; 32]).is_zero());
    }

    #[test]
    fn node_id_display_round_trips() {
        let id = NodeId::new([0xab; 32]);
        assert_eq!(id.to_string().parse::<NodeId>(), Ok(id));
    }

    param_test! {
        node_id_parse_rejects -> (): [
            empty: (""),
            too_short: ("abcd"),
            not_hex: (&"zz".repeat(32)),
        ]
    }
    fn node_id_parse_rejects(input: &str) {
        assert_eq!(input.parse::<NodeId>(), Err(NodeIdParseError));
    }
}
