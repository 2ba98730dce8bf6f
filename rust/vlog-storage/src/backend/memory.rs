use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::VlogStorageError;

use super::StorageBackend;

/// A trivial implementation of [StorageBackend] where the whole space is kept
/// in memory and never persisted. Clones share the same space.
#[derive(Clone, Default, Debug)]
pub struct MemoryStorageBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl StorageBackend for MemoryStorageBackend {
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, VlogStorageError> {
        let bytes = self.bytes.read().await;
        let end = offset.saturating_add(length);
        if end > bytes.len() as u64 {
            return Err(VlogStorageError::NotFound { offset, length });
        }
        Ok(bytes[offset as usize..end as usize].to_vec())
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<(), VlogStorageError> {
        let mut bytes = self.bytes.write().await;
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn len(&self) -> Result<u64, VlogStorageError> {
        Ok(self.bytes.read().await.len() as u64)
    }
}
