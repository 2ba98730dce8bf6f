use async_trait::async_trait;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{Region, StorageBackend, StorageProvider, VlogStorageError};

#[derive(Clone, Default, Debug)]
struct Counters {
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

/// A [MeasuredStorageBackend] acts as a proxy over a [StorageBackend]
/// implementation that measures reads and writes.
#[derive(Clone, Debug)]
pub struct MeasuredStorageBackend<Backend>
where
    Backend: StorageBackend,
{
    counters: Counters,
    backend: Backend,
}

impl<Backend> MeasuredStorageBackend<Backend>
where
    Backend: StorageBackend,
{
    /// Wrap the provided [StorageBackend] so that reads and writes to it may be
    /// measured.
    pub fn new(backend: Backend) -> Self {
        Self {
            counters: Counters::default(),
            backend,
        }
    }

    /// The aggregate number of reads from the wrapped [StorageBackend]
    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::Relaxed)
    }

    /// The aggregate number of writes to the wrapped [StorageBackend]
    pub fn writes(&self) -> usize {
        self.counters.writes.load(Ordering::Relaxed)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<Backend> StorageBackend for MeasuredStorageBackend<Backend>
where
    Backend: StorageBackend,
{
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, VlogStorageError> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        self.backend.read(offset, length).await
    }

    async fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), VlogStorageError> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.backend.write(offset, bytes).await
    }

    async fn len(&self) -> Result<u64, VlogStorageError> {
        self.backend.len().await
    }
}

/// Wraps a [StorageProvider] so that every region it opens shares one pair
/// of read/write counters.
#[derive(Clone, Debug)]
pub struct MeasuredStorageProvider<Provider> {
    counters: Counters,
    provider: Provider,
}

impl<Provider> MeasuredStorageProvider<Provider>
where
    Provider: StorageProvider,
{
    /// Wrap the provided [StorageProvider]
    pub fn new(provider: Provider) -> Self {
        Self {
            counters: Counters::default(),
            provider,
        }
    }

    /// Reads across every region opened so far
    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::Relaxed)
    }

    /// Writes across every region opened so far
    pub fn writes(&self) -> usize {
        self.counters.writes.load(Ordering::Relaxed)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<Provider> StorageProvider for MeasuredStorageProvider<Provider>
where
    Provider: StorageProvider,
{
    type Backend = MeasuredStorageBackend<Provider::Backend>;

    async fn open(&self, region: Region) -> Result<Self::Backend, VlogStorageError> {
        Ok(MeasuredStorageBackend {
            counters: self.counters.clone(),
            backend: self.provider.open(region).await?,
        })
    }
}
