use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VlogStorageError {
    /// A read reached past the end of the region
    #[error("Nothing stored at offset {offset} (length {length})")]
    NotFound {
        /// Start of the requested range
        offset: u64,
        /// Length of the requested range
        length: u64,
    },

    /// An error that occurs when working with a storage backend
    #[error("Storage backend error: {0}")]
    StorageBackend(String),
}

impl VlogStorageError {
    /// True when the error only reports a range that was never written
    pub fn is_not_found(&self) -> bool {
        matches!(self, VlogStorageError::NotFound { .. })
    }
}

impl From<std::io::Error> for VlogStorageError {
    fn from(error: std::io::Error) -> Self {
        VlogStorageError::StorageBackend(format!("{error}"))
    }
}
