use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use vlog_common::ConditionalSync;

use crate::{MemoryStorageBackend, StorageBackend, VlogStorageError};

#[cfg(not(target_arch = "wasm32"))]
use crate::FileSystemStorageBackend;

/// The independent byte spaces a feed persists into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// The fixed-size header record
    Info,
    /// The tree node table
    Tree,
    /// Block payloads, packed in append order
    Data,
    /// Presence of blocks
    DataBitfield,
    /// Presence of tree nodes
    TreeBitfield,
}

impl Region {
    /// Every region, in a stable order
    pub const ALL: [Region; 5] = [
        Region::Info,
        Region::Tree,
        Region::Data,
        Region::DataBitfield,
        Region::TreeBitfield,
    ];

    /// A stable name, usable as a file name
    pub fn name(&self) -> &'static str {
        match self {
            Region::Info => "info",
            Region::Tree => "tree",
            Region::Data => "data",
            Region::DataBitfield => "bitfield",
            Region::TreeBitfield => "tree-bitfield",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A [StorageProvider] opens the [StorageBackend] for each [Region] of a
/// single feed.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait StorageProvider: Clone + ConditionalSync + 'static {
    /// The backend type handed out for every region
    type Backend: StorageBackend + 'static;

    /// Open the backend for `region`
    async fn open(&self, region: Region) -> Result<Self::Backend, VlogStorageError>;
}

/// Keeps every region in memory. Opening the same region twice yields the
/// same space, so a feed can be closed and reopened against one provider.
#[derive(Clone, Default, Debug)]
pub struct MemoryStorageProvider {
    regions: Arc<Mutex<HashMap<Region, MemoryStorageBackend>>>,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl StorageProvider for MemoryStorageProvider {
    type Backend = MemoryStorageBackend;

    async fn open(&self, region: Region) -> Result<Self::Backend, VlogStorageError> {
        Ok(self.regions.lock().entry(region).or_default().clone())
    }
}

/// Keeps one file per region inside a root directory
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct FileSystemStorageProvider {
    root: PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileSystemStorageProvider {
    /// Creates a provider rooted at `root`. Nothing is touched on disk until a
    /// region is opened.
    pub fn new<Pathlike>(root: Pathlike) -> Self
    where
        Pathlike: Into<PathBuf>,
    {
        Self { root: root.into() }
    }

    /// The directory holding the region files
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl StorageProvider for FileSystemStorageProvider {
    type Backend = FileSystemStorageBackend;

    async fn open(&self, region: Region) -> Result<Self::Backend, VlogStorageError> {
        tracing::trace!(?region, root = ?self.root, "Opening region file");
        FileSystemStorageBackend::new(self.root.join(region.name())).await
    }
}
