use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The size of a [Hash] in bytes.
pub const HASH_SIZE: usize = 32;

/// The all-zero hash, used on disk as the "absent" sentinel.
pub const NULL_HASH: Hash = Hash([0u8; HASH_SIZE]);

/// Produced when a [Hash] can not be read from text or bytes
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HashError {
    /// The input was not exactly [HASH_SIZE] bytes long
    #[error("Expected {HASH_SIZE} bytes, got {0}")]
    WrongLength(usize),

    /// The input was not valid hexadecimal
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

/// A 32-byte BLAKE3 digest.
///
/// The text form is lowercase hex, and the serialized form is a compact byte
/// string so that it stays small inside CBOR frames.
///
/// ```rust
/// use vlog_common::Hash;
///
/// let hash = Hash::digest(b"hello world");
/// let parsed: Hash = hash.to_string().parse().unwrap();
/// assert_eq!(hash, parsed);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Hashes the given bytes in one shot.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).into())
    }

    /// Hashes a sequence of chunks as if they were concatenated.
    pub fn digest_chunks<'a, I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        Self(hasher.finalize().into())
    }

    /// The raw digest bytes
    pub fn bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// True for the all-zero sentinel
    pub fn is_null(&self) -> bool {
        self.0 == NULL_HASH.0
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(value: [u8; HASH_SIZE]) -> Self {
        Hash(value)
    }
}

impl From<Hash> for [u8; HASH_SIZE] {
    fn from(value: Hash) -> Self {
        value.0
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = HashError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; HASH_SIZE] = value
            .try_into()
            .map_err(|_| HashError::WrongLength(value.len()))?;
        Ok(Hash(bytes))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(value).map_err(|error| HashError::InvalidHex(format!("{error}")))?;
        Hash::try_from(bytes.as_slice())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Hash::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
    }
}
