use async_trait::async_trait;
use vlog_common::ConditionalSync;

use crate::VlogStorageError;

mod memory;
pub use memory::*;

#[cfg(not(target_arch = "wasm32"))]
mod fs;
#[cfg(not(target_arch = "wasm32"))]
pub use fs::*;

/// A [StorageBackend] is a facade over a random-access byte space. Offsets
/// are absolute; the space grows as it is written and any gap left by a write
/// past the end reads back as zeros.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait StorageBackend: Clone + ConditionalSync {
    /// Read exactly `length` bytes at `offset`. Any byte past the current end
    /// of the space yields [VlogStorageError::NotFound].
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, VlogStorageError>;

    /// Write `bytes` at `offset`, extending the space if needed
    async fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), VlogStorageError>;

    /// The current length of the space in bytes
    async fn len(&self) -> Result<u64, VlogStorageError>;

    /// Read the whole space
    async fn read_all(&self) -> Result<Vec<u8>, VlogStorageError> {
        let length = self.len().await?;
        self.read(0, length).await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::{
        FileSystemStorageBackend, MeasuredStorageBackend, MemoryStorageBackend, StorageBackend,
        VlogStorageError,
    };

    async fn exercise_backend<B: StorageBackend>(backend: B) -> Result<()> {
        assert_eq!(backend.len().await?, 0);
        assert!(backend.read(0, 1).await.unwrap_err().is_not_found());

        backend.write(0, b"hello").await?;
        assert_eq!(backend.read(0, 5).await?, b"hello".to_vec());
        assert_eq!(backend.read(1, 3).await?, b"ell".to_vec());

        backend.write(8, b"world").await?;
        assert_eq!(backend.len().await?, 13);
        assert_eq!(backend.read(5, 3).await?, vec![0, 0, 0]);
        assert_eq!(backend.read_all().await?, b"hello\0\0\0world".to_vec());

        assert_eq!(
            backend.read(10, 4).await,
            Err(VlogStorageError::NotFound {
                offset: 10,
                length: 4
            })
        );

        backend.write(1, b"ipp").await?;
        assert_eq!(backend.read(0, 5).await?, b"hippo".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn it_reads_and_writes_ranges_in_memory() -> Result<()> {
        exercise_backend(MemoryStorageBackend::default()).await
    }

    #[tokio::test]
    async fn it_reads_and_writes_ranges_on_the_file_system() -> Result<()> {
        let root = tempfile::tempdir()?;
        let backend = FileSystemStorageBackend::new(root.path().join("region")).await?;
        exercise_backend(backend).await
    }

    #[tokio::test]
    async fn it_measures_reads_and_writes() -> Result<()> {
        let backend = MeasuredStorageBackend::new(MemoryStorageBackend::default());
        exercise_backend(backend.clone()).await?;

        assert_eq!(backend.writes(), 3);
        assert!(backend.reads() >= 7);
        Ok(())
    }

    #[tokio::test]
    async fn it_shares_state_between_clones() -> Result<()> {
        let backend = MemoryStorageBackend::default();
        let clone = backend.clone();

        clone.write(0, &[1, 2, 3]).await?;
        assert_eq!(backend.read(0, 3).await?, vec![1, 2, 3]);
        Ok(())
    }
}
