use thiserror::Error;
use vlog_storage::VlogStorageError;
use vlog_tree::VlogTreeError;

use crate::PublicKey;

/// The common error type used by this crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VlogFeedError {
    /// A storage backend read or write failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A block or proof did not check out against the feed's key
    #[error("Could not verify data")]
    VerificationFailed,

    /// The persisted key differs from the one the feed was opened with
    #[error("Feed was opened as {expected} but storage holds {persisted}")]
    IdentityConflict {
        /// The key the feed was constructed with
        expected: PublicKey,
        /// The key found in the persisted header
        persisted: PublicKey,
    },

    /// The feed can not append, or can not produce a block locally
    #[error("Feed is not writable")]
    NotWritable,

    /// A stored payload disagrees with its tree node
    #[error("Expected {expected} bytes but found {actual}")]
    UnexpectedSize {
        /// Size recorded in the tree node
        expected: u64,
        /// Size available in storage
        actual: u64,
    },

    /// A tree node that should be stored is absent
    #[error("Missing tree node {0}")]
    MissingNode(u64),

    /// A block index lies beyond the largest tree a feed can address
    #[error("Block {0} is out of range")]
    OutOfRange(u64),

    /// Not enough of the tree is held to prove a block
    #[error("Unable to prove block {0}")]
    ProofUnavailable(u64),

    /// A key or signature could not be parsed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Configuration could not be parsed
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// A peer broke the replication protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The feed was closed
    #[error("Feed is closed")]
    Closed,
}

impl From<VlogStorageError> for VlogFeedError {
    fn from(error: VlogStorageError) -> Self {
        VlogFeedError::StorageUnavailable(format!("{error}"))
    }
}

impl From<VlogTreeError> for VlogFeedError {
    fn from(error: VlogTreeError) -> Self {
        VlogFeedError::Protocol(format!("{error}"))
    }
}
