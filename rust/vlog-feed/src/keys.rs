use std::{fmt, str::FromStr};

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use vlog_common::{HASH_SIZE, Hash};

use crate::VlogFeedError;

/// Length of an Ed25519 secret key seed
pub const SECRET_KEY_SIZE: usize = 32;

/// Length of an Ed25519 signature
pub const SIGNATURE_SIZE: usize = 64;

/// The public identity of a feed.
///
/// For a live feed this is an Ed25519 verifying key; for a finalized static
/// feed it is the checksum of the feed's full roots. Either way its portable
/// text form is 64 lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(Hash);

impl PublicKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        PublicKey(Hash::from(bytes))
    }

    /// The raw key bytes
    pub fn bytes(&self) -> &[u8; HASH_SIZE] {
        self.0.bytes()
    }

    /// Whether this key, read as a fixed root commitment, equals `checksum`
    pub fn commits_to(&self, checksum: &Hash) -> bool {
        &self.0 == checksum
    }

    /// Whether `signature` over `checksum` was made by this key
    pub fn verify(&self, checksum: &Hash, signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(self.0.bytes()) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(checksum.bytes(), &signature).is_ok()
    }
}

impl From<Hash> for PublicKey {
    fn from(value: Hash) -> Self {
        PublicKey(value)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.0)
    }
}

impl FromStr for PublicKey {
    type Err = VlogFeedError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .parse::<Hash>()
            .map(PublicKey)
            .map_err(|error| VlogFeedError::InvalidKey(format!("{error}")))
    }
}

/// The signing half of a live feed's key pair
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        SecretKey(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Restore a key pair from its 32-byte seed
    pub fn from_seed(seed: &[u8; SECRET_KEY_SIZE]) -> Self {
        SecretKey(SigningKey::from_bytes(seed))
    }

    /// The 32-byte seed, as persisted in the feed header
    pub fn seed(&self) -> [u8; SECRET_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// The matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.0.verifying_key().to_bytes())
    }

    /// Sign a tree checksum
    pub fn sign(&self, checksum: &Hash) -> Signature {
        Signature(self.0.sign(checksum.bytes()).to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(for {})", self.public_key())
    }
}

/// An Ed25519 signature over a tree checksum
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Wrap raw signature bytes
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Signature(bytes)
    }

    /// The raw signature bytes
    pub fn bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// True for the all-zero "no signature" sentinel
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = VlogFeedError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SIGNATURE_SIZE] = value.try_into().map_err(|_| {
            VlogFeedError::InvalidKey(format!(
                "Expected a {SIGNATURE_SIZE} byte signature, got {}",
                value.len()
            ))
        })?;
        Ok(Signature(bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Signature::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn it_signs_and_verifies_checksums() {
        let secret = SecretKey::generate();
        let checksum = Hash::digest(b"roots");
        let signature = secret.sign(&checksum);

        assert!(secret.public_key().verify(&checksum, &signature));
        assert!(!secret.public_key().verify(&Hash::digest(b"other"), &signature));
        assert!(!SecretKey::generate().public_key().verify(&checksum, &signature));
    }

    #[test]
    fn it_restores_a_key_pair_from_its_seed() {
        let secret = SecretKey::generate();
        let restored = SecretKey::from_seed(&secret.seed());

        assert_eq!(restored.public_key(), secret.public_key());
    }

    #[test]
    fn it_round_trips_public_keys_through_hex() -> Result<()> {
        let key = SecretKey::generate().public_key();
        let text = key.to_string();

        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<PublicKey>()?, key);
        assert!(matches!(
            "not a key".parse::<PublicKey>(),
            Err(VlogFeedError::InvalidKey(_))
        ));
        Ok(())
    }

    #[test]
    fn it_treats_a_checksum_key_as_a_commitment() {
        let checksum = Hash::digest(b"static");
        let key = PublicKey::from(checksum);

        assert!(key.commits_to(&checksum));
        assert!(!key.commits_to(&Hash::digest(b"changed")));
    }
}
