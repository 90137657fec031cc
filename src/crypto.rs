//! Cryptographic primitives consumed by the core.
//!
//! Signature verification, hashing and Merkle tree construction are, per
//! design, external concerns: a production deployment is free to swap in
//! hardware-backed verification or a different curve. This module pins down
//! the narrow interface the rest of the crate needs and ships a default
//! implementation (ed25519 + SHA-256) so the crate is self-contained for
//! tests and small deployments.

use ed25519_dalek::Verifier as _;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 32-byte content hash.
///
/// For block ids the first four bytes additionally encode the block number,
/// big-endian, so that ordering by id within a fork is cheap and a block
/// number can be recovered without a side table.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize, Default,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hashes the SCALE encoding of `value`.
    pub fn of<T: Encode>(value: &T) -> Self {
        let encoded = value.encode();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Hash(bytes)
    }

    /// Reads the big-endian block number out of the leading four bytes.
    pub fn block_num(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Builds a block id whose leading bytes encode `num`, keeping the rest
    /// of the digest of `header_bytes` as entropy.
    pub fn block_id(num: u32, header_bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(header_bytes);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        bytes[..4].copy_from_slice(&num.to_be_bytes());
        Hash(bytes)
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Computes a Merkle root over an ordered list of leaf hashes.
///
/// An empty list hashes to [`Hash::ZERO`]; a single leaf hashes to itself.
/// Odd levels duplicate the last node, matching the scheme used by the
/// original source's transaction Merkle tree.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("non-empty"));
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut hasher = Sha256::new();
                hasher.update(pair[0].0);
                hasher.update(pair[1].0);
                let digest = hasher.finalize();
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(&digest);
                Hash(bytes)
            })
            .collect();
    }
    level[0]
}

/// An ed25519 public key, as used by producer signing keys and account
/// authorities.
#[derive(Clone, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex_prefix(&self.0))
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes[..4.min(bytes.len())]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// An ed25519 signature over a [`Hash`].
#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub struct Signature(pub [u8; 64]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex_prefix(&self.0))
    }
}

// `[u8; 64]` is outside the fixed array lengths serde's derive macros
// support directly, so the newtype is (de)serialized as a byte sequence
// by hand instead of deriving Serialize/Deserialize.
impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(deserializer)?;
        let array: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 signature bytes"))?;
        Ok(Signature(array))
    }
}

/// Verifies that `signature` is a valid ed25519 signature of `hash` under
/// `key`. Isolated behind a free function so the rest of the crate never
/// reaches for `ed25519_dalek` directly, keeping the curve swappable.
pub fn verify(key: &PublicKey, hash: &Hash, signature: &Signature) -> bool {
    let Ok(verifying) = ed25519_dalek::PublicKey::from_bytes(&key.0) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    let Ok(sig) = sig else {
        return false;
    };
    verifying.verify(&hash.0, &sig).is_ok()
}

/// Test-only helper: generates a keypair and signs `hash`, used throughout
/// the unit and scenario tests to avoid hand-rolling key material.
#[cfg(any(test, feature = "test-utils"))]
pub fn generate_and_sign(hash: &Hash) -> (PublicKey, Signature) {
    use ed25519_dalek::Signer as _;
    use rand07::rngs::OsRng;
    let mut csprng = OsRng {};
    let keypair = ed25519_dalek::Keypair::generate(&mut csprng);
    let sig = keypair.sign(&hash.0);
    (PublicKey(keypair.public.to_bytes()), Signature(sig.to_bytes()))
}
