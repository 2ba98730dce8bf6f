use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VlogTreeError {
    /// A run-length encoded bitfield could not be decoded
    #[error("Malformed bitfield: {0}")]
    MalformedBitfield(String),

    /// A run-length encoded bitfield could not be encoded
    #[error("Failed to encode bitfield: {0}")]
    EncodeFailed(String),

    /// The tree can not grow any further
    #[error("Tree overflow: {0}")]
    Overflow(String),
}
