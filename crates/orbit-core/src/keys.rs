// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! Signing keys used by the satellite.

use std::{str::FromStr, sync::Arc};

use fastcrypto::{
    ed25519::{Ed25519KeyPair, Ed25519PublicKey},
    encoding::{Base64, Encoding},
    traits::{AllowedRng, KeyPair, Signer, ToFromBytes},
};
use serde::Serialize;

use crate::messages::SignedMessage;

/// Identifier for the type of key being loaded from file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureScheme {
    /// Identifies an Ed25519 key.
    Ed25519 = 0x00,
}

impl SignatureScheme {
    /// Returns the enum variant as a u8 value.
    pub const fn to_u8(&self) -> u8 {
        *self as u8
    }
}

/// Error returned when parsing a base64-encoded key pair fails.
#[derive(Debug, thiserror::Error)]
pub enum KeyPairParseError {
    /// The encoding is not valid base64 or has the wrong length.
    #[error("invalid key encoding")]
    InvalidEncoding,
    /// The scheme flag byte does not identify a supported scheme.
    #[error("unsupported key scheme flag: {0:#04x}")]
    UnsupportedScheme(u8),
}

/// The key pair the satellite uses to sign order limits.
///
/// The private key material is zeroized when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct SatelliteKeyPair(Arc<Ed25519KeyPair>);

impl SatelliteKeyPair {
    /// Creates a new `SatelliteKeyPair` from an [`Ed25519KeyPair`].
    pub fn new(keypair: Ed25519KeyPair) -> Self {
        Self(Arc::new(keypair))
    }

    /// Generates a new key pair using the specified random number generator.
    pub fn generate_with_rng(rng: &mut impl AllowedRng) -> Self {
        Self::new(Ed25519KeyPair::generate(rng))
    }

    /// Generates a new key pair using thread-local randomness.
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut rand::thread_rng())
    }

    /// The public half of the key pair.
    pub fn public(&self) -> &Ed25519PublicKey {
        self.0.public()
    }

    /// Signs `message` and returns the resulting [`SignedMessage`].
    ///
    /// The signature covers the canonical BCS encoding of the message.
    pub fn sign_message<T>(&self, message: T) -> SignedMessage<T>
    where
        T: Serialize,
    {
        let encoded = bcs::to_bytes(&message).expect("bcs encoding a message should not fail");
        let signature = self.0.as_ref().sign(&encoded);
        SignedMessage::new(message, signature)
    }

    /// Encodes the key pair as `flag || private_key_bytes` in base64.
    pub fn to_base64(&self) -> String {
        let mut bytes = vec![SignatureScheme::Ed25519.to_u8()];
        bytes.extend_from_slice(self.0.as_bytes());
        Base64::encode(bytes)
    }
}

impl AsRef<Ed25519KeyPair> for SatelliteKeyPair {
    fn as_ref(&self) -> &Ed25519KeyPair {
        &self.0
    }
}

impl FromStr for SatelliteKeyPair {
    type Err = KeyPairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = Base64::decode(s).map_err(|_| KeyPairParseError::InvalidEncoding)?;
        let (flag, key_bytes) = bytes
            .split_first()
            .ok_or(KeyPairParseError::InvalidEncoding)?;
        if *flag != SignatureScheme::Ed25519.to_u8() {
            return Err(KeyPairParseError::UnsupportedScheme(*flag));
        }
        let keypair =
            Ed25519KeyPair::from_bytes(key_bytes).map_err(|_| KeyPairParseError::InvalidEncoding)?;
        Ok(Self::new(keypair))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let keypair = SatelliteKeyPair::generate();
        let parsed: SatelliteKeyPair = keypair.to_base64().parse().expect("round trip");
        assert_eq!(keypair.public(), parsed.public());
    }

    #[test]
    fn rejects_unknown_scheme_flag() {
        let keypair = SatelliteKeyPair::generate();
        let mut bytes = vec![0x42u8];
        bytes.extend_from_slice(keypair.0.as_bytes());
        let encoded = Base64::encode(bytes);
        assert!(matches!(
            encoded.parse::<SatelliteKeyPair>(),
            Err(KeyPairParseError::UnsupportedScheme(0x42))
        ));
    }

    #[test]
    fn signed_messages_verify() {
        let keypair = SatelliteKeyPair::generate();
        let signed = keypair.sign_message("authorized".to_string());
        assert!(signed.verify(keypair.public()).is_ok());

        let other = SatelliteKeyPair::generate();
        assert!(signed.verify(other.public()).is_err());
    }
}
