use std::sync::Arc;

use futures_util::future::try_join_all;
use parking_lot::Mutex;
use sieve_cache::SieveCache;
use tracing::trace;
use vlog_common::{HASH_SIZE, Hash};
use vlog_storage::{Region, StorageBackend, StorageProvider, VlogStorageError};
use vlog_tree::{Bitfield, Node, PAGE_SIZE, flat};

use crate::{PublicKey, SIGNATURE_SIZE, SecretKey, Signature, VlogFeedError};

/// Bytes of hash and size at the start of every node record
pub const NODE_SIZE: u64 = 40;

/// Size of the header record
pub const HEADER_SIZE: u64 = 80;

const LIVE_FLAG: u8 = 1;

/// Byte offset of the record for node `index` in the tree region. Leaf
/// records carry a trailing signature slot, so they are wider than the
/// internal records they are interleaved with.
pub fn node_offset(index: u64) -> u64 {
    NODE_SIZE * index + SIGNATURE_SIZE as u64 * index.div_ceil(2)
}

/// The durable root of trust for reopening a feed
#[derive(Clone, Debug, Default)]
pub struct Header {
    /// Number of committed blocks
    pub blocks: u64,
    /// The feed's public key, once known
    pub key: Option<PublicKey>,
    /// The feed's secret key, when this instance can append
    pub secret: Option<SecretKey>,
    /// Whether the feed is live
    pub live: bool,
}

impl Header {
    /// The fixed-size record: `u64be blocks ‖ key ‖ secret seed ‖ flags`,
    /// with all-zero key or seed meaning absent
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE as usize];
        bytes[0..8].copy_from_slice(&self.blocks.to_be_bytes());
        if let Some(key) = &self.key {
            bytes[8..40].copy_from_slice(key.bytes());
        }
        if let Some(secret) = &self.secret {
            bytes[40..72].copy_from_slice(&secret.seed());
        }
        if self.live {
            bytes[72] |= LIVE_FLAG;
        }
        bytes
    }

    /// Read a record produced by [Header::encode]
    pub fn decode(bytes: &[u8]) -> Result<Self, VlogFeedError> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(VlogFeedError::UnexpectedSize {
                expected: HEADER_SIZE,
                actual: bytes.len() as u64,
            });
        }

        let mut blocks = [0u8; 8];
        blocks.copy_from_slice(&bytes[0..8]);
        let mut key = [0u8; HASH_SIZE];
        key.copy_from_slice(&bytes[8..40]);
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[40..72]);

        Ok(Header {
            blocks: u64::from_be_bytes(blocks),
            key: (key != [0u8; HASH_SIZE]).then(|| PublicKey::from_bytes(key)),
            secret: (seed != [0u8; 32]).then(|| SecretKey::from_seed(&seed)),
            live: bytes[72] & LIVE_FLAG == LIVE_FLAG,
        })
    }
}

/// Which presence bitfield a set of pages belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitfieldKind {
    /// Block presence
    Data,
    /// Tree node presence
    Tree,
}

/// The durable table of tree nodes, block payloads, presence bitfields and
/// the header, one [StorageBackend] per [Region].
///
/// Nodes are immutable once written, so recently used ones are kept in a
/// bounded [SieveCache] that never needs invalidating.
#[derive(Clone)]
pub struct NodeStore<Backend>
where
    Backend: StorageBackend,
{
    info: Backend,
    tree: Backend,
    data: Backend,
    data_bitfield: Backend,
    tree_bitfield: Backend,
    cache: Option<Arc<Mutex<SieveCache<u64, Node>>>>,
}

impl<Backend> NodeStore<Backend>
where
    Backend: StorageBackend + 'static,
{
    /// Open every region from `provider`
    pub async fn open<Provider>(provider: &Provider, cache_size: usize) -> Result<Self, VlogFeedError>
    where
        Provider: StorageProvider<Backend = Backend>,
    {
        let cache = match cache_size {
            0 => None,
            size => Some(Arc::new(Mutex::new(SieveCache::new(size).map_err(
                |error| {
                    VlogFeedError::StorageUnavailable(format!(
                        "Could not initialize node cache: {error}"
                    ))
                },
            )?))),
        };

        Ok(Self {
            info: provider.open(Region::Info).await?,
            tree: provider.open(Region::Tree).await?,
            data: provider.open(Region::Data).await?,
            data_bitfield: provider.open(Region::DataBitfield).await?,
            tree_bitfield: provider.open(Region::TreeBitfield).await?,
            cache,
        })
    }

    /// The persisted header, or `None` for a fresh feed
    pub async fn read_header(&self) -> Result<Option<Header>, VlogFeedError> {
        match self.info.read(0, HEADER_SIZE).await {
            Ok(bytes) => Header::decode(&bytes).map(Some),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Persist the header
    pub async fn write_header(&self, header: &Header) -> Result<(), VlogFeedError> {
        trace!(blocks = header.blocks, "Writing header");
        self.info.write(0, &header.encode()).await?;
        Ok(())
    }

    /// Load both presence bitfields in full
    pub async fn read_bitfields(&self) -> Result<(Bitfield, Bitfield), VlogFeedError> {
        let (data, tree) = futures_util::try_join!(
            self.data_bitfield.read_all(),
            self.tree_bitfield.read_all()
        )?;
        Ok((Bitfield::from_bytes(&data), Bitfield::from_bytes(&tree)))
    }

    /// Persist bitfield pages as produced by [Bitfield::dirty_pages]
    pub async fn write_pages(
        &self,
        kind: BitfieldKind,
        pages: &[(u64, Vec<u8>)],
    ) -> Result<(), VlogFeedError> {
        let backend = match kind {
            BitfieldKind::Data => &self.data_bitfield,
            BitfieldKind::Tree => &self.tree_bitfield,
        };
        try_join_all(
            pages
                .iter()
                .map(|(page, bytes)| backend.write(page * PAGE_SIZE as u64, bytes)),
        )
        .await?;
        Ok(())
    }

    /// Read node `index`. An all-zero record counts as absent.
    pub async fn get_node(&self, index: u64) -> Result<Node, VlogFeedError> {
        if let Some(cache) = &self.cache {
            if let Some(node) = cache.lock().get(&index) {
                return Ok(*node);
            }
        }

        let bytes = match self.tree.read(node_offset(index), NODE_SIZE).await {
            Ok(bytes) => bytes,
            Err(VlogStorageError::NotFound { .. }) => return Err(VlogFeedError::MissingNode(index)),
            Err(error) => return Err(error.into()),
        };

        let hash = Hash::try_from(&bytes[0..HASH_SIZE])
            .map_err(|error| VlogFeedError::StorageUnavailable(format!("{error}")))?;
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[HASH_SIZE..NODE_SIZE as usize]);
        let size = u64::from_be_bytes(size);

        if hash.is_null() && size == 0 {
            return Err(VlogFeedError::MissingNode(index));
        }

        let node = Node { index, hash, size };
        if let Some(cache) = &self.cache {
            cache.lock().insert(index, node);
        }
        Ok(node)
    }

    /// Whether node `index` has a record on disk
    pub async fn has_node(&self, index: u64) -> Result<bool, VlogFeedError> {
        match self.get_node(index).await {
            Ok(_) => Ok(true),
            Err(VlogFeedError::MissingNode(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Write a node record. A signature is only stored for leaves; without
    /// one the signature slot is left untouched.
    pub async fn put_node(
        &self,
        node: &Node,
        signature: Option<&Signature>,
    ) -> Result<(), VlogFeedError> {
        let mut bytes = Vec::with_capacity(NODE_SIZE as usize + SIGNATURE_SIZE);
        bytes.extend_from_slice(node.hash.bytes());
        bytes.extend_from_slice(&node.size.to_be_bytes());
        if let Some(signature) = signature.filter(|_| flat::depth(node.index) == 0) {
            bytes.extend_from_slice(signature.bytes());
        }

        self.tree.write(node_offset(node.index), &bytes).await?;
        if let Some(cache) = &self.cache {
            cache.lock().insert(node.index, *node);
        }
        Ok(())
    }

    /// Write only the signature slot of leaf `index`
    pub async fn put_signature(
        &self,
        index: u64,
        signature: &Signature,
    ) -> Result<(), VlogFeedError> {
        self.tree
            .write(node_offset(index) + NODE_SIZE, signature.bytes())
            .await?;
        Ok(())
    }

    /// The signature stored with leaf `index`, if any
    pub async fn get_signature(&self, index: u64) -> Result<Option<Signature>, VlogFeedError> {
        let bytes = match self
            .tree
            .read(node_offset(index) + NODE_SIZE, SIGNATURE_SIZE as u64)
            .await
        {
            Ok(bytes) => bytes,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let signature = Signature::try_from(bytes.as_slice())?;
        Ok((!signature.is_null()).then_some(signature))
    }

    /// The full roots covering the first `blocks` blocks
    pub async fn roots(&self, blocks: u64) -> Result<Vec<Node>, VlogFeedError> {
        try_join_all(
            flat::full_roots(blocks * 2)
                .into_iter()
                .map(|index| self.get_node(index)),
        )
        .await
    }

    /// Byte offset of block `block` in the data region: the size of every
    /// full root to its left. Nodes in `pending` take precedence over storage.
    pub async fn data_offset(&self, block: u64, pending: &[Node]) -> Result<u64, VlogFeedError> {
        let sizes = try_join_all(flat::full_roots(block * 2).into_iter().map(|index| async move {
            match pending.iter().find(|node| node.index == index) {
                Some(node) => Ok(node.size),
                None => self.get_node(index).await.map(|node| node.size),
            }
        }))
        .await?;
        Ok(sizes.into_iter().sum())
    }

    /// Read the payload of `block`
    pub async fn get_data(&self, block: u64) -> Result<Vec<u8>, VlogFeedError> {
        let (leaf, offset) = futures_util::try_join!(
            self.get_node(block * 2),
            self.data_offset(block, &[])
        )?;

        match self.data.read(offset, leaf.size).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.is_not_found() => Err(VlogFeedError::UnexpectedSize {
                expected: leaf.size,
                actual: self.data.len().await?.saturating_sub(offset),
            }),
            Err(error) => Err(error.into()),
        }
    }

    /// Write a payload at a known offset, checking it against its leaf
    pub async fn put_data(&self, offset: u64, leaf: &Node, data: &[u8]) -> Result<(), VlogFeedError> {
        if leaf.size != data.len() as u64 {
            return Err(VlogFeedError::UnexpectedSize {
                expected: leaf.size,
                actual: data.len() as u64,
            });
        }
        self.data.write(offset, data).await?;
        Ok(())
    }
}
