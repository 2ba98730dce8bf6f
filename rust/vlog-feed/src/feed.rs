use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures_util::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{OnceCell, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};
use vlog_common::Hash;
use vlog_storage::{StorageBackend, StorageProvider};
use vlog_tree::{Bitfield, Merklizer, ProofPlan, TreeIndex, flat};

use crate::{
    FeedOptions, Header, NodeStore, Peer, Proof, ProofOptions, PublicKey, SecretKey, VlogFeedError,
};

mod commit;
pub(crate) use commit::Commit;

mod observer;
pub use observer::*;

/// Everything about a feed that changes as it is used. Only the committer
/// task mutates the tree, bitfields and counters; sessions only touch
/// selections, reservations and the peer set.
pub(crate) struct FeedState {
    pub key: Option<PublicKey>,
    pub secret: Option<SecretKey>,
    pub live: bool,
    pub blocks: u64,
    pub bytes: u64,
    pub bitfield: Bitfield,
    pub tree: TreeIndex,
    pub merkle: Merklizer,
    /// Blocks that local readers are waiting on
    pub selections: BTreeMap<u64, Vec<oneshot::Sender<()>>>,
    /// Which peer (by serial) a selected block has been requested from
    pub reservations: HashMap<u64, u64>,
    pub peers: Vec<Arc<Peer>>,
}

impl FeedState {
    /// A live feed holding its secret key, or a static feed that has not been
    /// finalized yet
    pub fn writable(&self) -> bool {
        self.secret.is_some() || (!self.live && self.key.is_none())
    }

    pub fn header(&self) -> Header {
        Header {
            blocks: self.blocks,
            key: self.key,
            secret: self.secret.clone(),
            live: self.live,
        }
    }
}

pub(crate) struct FeedInner<Provider>
where
    Provider: StorageProvider,
{
    pub provider: Provider,
    pub options: FeedOptions,
    pub id: Hash,
    pub expected_key: Option<PublicKey>,
    pub initial_secret: Option<SecretKey>,
    pub opened: OnceCell<()>,
    pub closed: AtomicBool,
    pub store: RwLock<Option<NodeStore<Provider::Backend>>>,
    pub state: RwLock<FeedState>,
    pub commits: Mutex<Option<mpsc::UnboundedSender<Commit>>>,
    pub committer: Mutex<Option<JoinHandle<()>>>,
    pub observers: RwLock<Vec<Arc<dyn FeedObserver>>>,
    pub next_peer: AtomicU64,
}

/// A single-writer, append-only log whose blocks can be verified by anyone
/// holding its [PublicKey].
///
/// A [Feed] is a cheap, cloneable handle. Every mutation (appends, verified
/// puts, finalization) is funneled through one committer task in FIFO order,
/// so the node table, the packed data and the presence bitfields never
/// diverge. Opening is lazy and memoized: the first operation loads the
/// header, bitfields and roots, and concurrent callers wait for it.
///
/// ```rust
/// # use anyhow::Result;
/// # use vlog_feed::{Feed, FeedOptions};
/// # use vlog_storage::MemoryStorageProvider;
/// #
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let feed = Feed::new(MemoryStorageProvider::default(), FeedOptions::default());
/// feed.append(b"hello").await?;
/// assert_eq!(feed.get(0).await?, b"hello");
/// # Ok(())
/// # }
/// ```
pub struct Feed<Provider>
where
    Provider: StorageProvider,
{
    pub(crate) inner: Arc<FeedInner<Provider>>,
}

impl<Provider> Clone for Feed<Provider>
where
    Provider: StorageProvider,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Provider> Feed<Provider>
where
    Provider: StorageProvider,
{
    /// A feed this instance can append to. A live feed generates a key pair
    /// the first time it is opened against empty storage; a static feed has
    /// no key until [Feed::finalize].
    pub fn new(provider: Provider, options: FeedOptions) -> Self {
        Self::build(provider, options, None, None)
    }

    /// A read-only replica of the feed identified by `key`
    pub fn with_key(key: PublicKey, provider: Provider, options: FeedOptions) -> Self {
        Self::build(provider, options, Some(key), None)
    }

    /// A live feed signing with an existing key pair
    pub fn with_keypair(secret: SecretKey, provider: Provider, options: FeedOptions) -> Self {
        Self::build(provider, options, Some(secret.public_key()), Some(secret))
    }

    fn build(
        provider: Provider,
        options: FeedOptions,
        expected_key: Option<PublicKey>,
        initial_secret: Option<SecretKey>,
    ) -> Self {
        let state = FeedState {
            key: expected_key,
            secret: initial_secret.clone(),
            live: options.live,
            blocks: 0,
            bytes: 0,
            bitfield: Bitfield::default(),
            tree: TreeIndex::default(),
            merkle: Merklizer::default(),
            selections: BTreeMap::new(),
            reservations: HashMap::new(),
            peers: Vec::new(),
        };

        Self {
            inner: Arc::new(FeedInner {
                provider,
                options,
                id: Hash::from(rand::random::<[u8; 32]>()),
                expected_key,
                initial_secret,
                opened: OnceCell::new(),
                closed: AtomicBool::new(false),
                store: RwLock::new(None),
                state: RwLock::new(state),
                commits: Mutex::new(None),
                committer: Mutex::new(None),
                observers: RwLock::new(Vec::new()),
                next_peer: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_weak(feed: &Weak<FeedInner<Provider>>) -> Result<Self, VlogFeedError> {
        feed.upgrade()
            .map(|inner| Feed { inner })
            .ok_or(VlogFeedError::Closed)
    }

    /// The feed's public key. Before the feed is opened this is only the key
    /// it was constructed with; a static feed has none until finalized.
    pub fn key(&self) -> Option<PublicKey> {
        self.inner.state.read().key
    }

    /// Number of blocks known to exist
    pub fn blocks(&self) -> u64 {
        self.inner.state.read().blocks
    }

    /// Total payload size of the known blocks
    pub fn bytes(&self) -> u64 {
        self.inner.state.read().bytes
    }

    /// Whether the feed is authenticated by signatures
    pub fn is_live(&self) -> bool {
        self.inner.state.read().live
    }

    /// Whether this instance can append
    pub fn is_writable(&self) -> bool {
        self.inner.state.read().writable()
    }

    /// The random token identifying this instance to peers
    pub fn id(&self) -> Hash {
        self.inner.id
    }

    /// Number of live replication sessions
    pub fn peers(&self) -> usize {
        self.inner.state.read().peers.len()
    }

    /// Register an observer for append, download and upload events
    pub fn observe(&self, observer: Arc<dyn FeedObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Load the feed from storage. Idempotent; every other operation calls
    /// it implicitly.
    pub async fn open(&self) -> Result<(), VlogFeedError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(VlogFeedError::Closed);
        }
        self.inner.opened.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    async fn load(&self) -> Result<(), VlogFeedError> {
        let inner = &self.inner;
        let store = NodeStore::open(&inner.provider, inner.options.cache_size).await?;
        let header = store.read_header().await?;
        let (mut bitfield, tree) = store.read_bitfields().await?;
        let mut tree = TreeIndex::new(tree);

        let mut key = inner.expected_key;
        let mut secret = inner.initial_secret.clone();
        let mut live = inner.options.live;
        let mut blocks = 0;

        match &header {
            Some(header) => {
                if let (Some(expected), Some(persisted)) = (inner.expected_key, header.key) {
                    if expected != persisted {
                        return Err(VlogFeedError::IdentityConflict {
                            expected,
                            persisted,
                        });
                    }
                }
                key = header.key.or(key);
                secret = header.secret.clone().or(secret);
                live = header.live;
                blocks = header.blocks;
            }
            None if live && key.is_none() => {
                let generated = SecretKey::generate();
                key = Some(generated.public_key());
                secret = Some(generated);
            }
            None => (),
        }
        if key.is_none() {
            key = secret.as_ref().map(SecretKey::public_key);
        }

        let writable = secret.is_some() || (!live && key.is_none());
        if writable {
            blocks = recover(&store, &mut bitfield, &mut tree, blocks).await?;
        }

        let roots = match store.roots(blocks).await {
            Ok(roots) => roots,
            Err(VlogFeedError::MissingNode(index)) if !writable => {
                warn!(index, blocks, "Frontier roots are not stored; byte count unknown");
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        let bytes = roots.iter().map(|root| root.size).sum();
        let merkle = if writable {
            Merklizer::from_roots(roots)
        } else {
            Merklizer::default()
        };

        let needs_sync = header.as_ref().map(|header| header.blocks) != Some(blocks)
            || bitfield.is_dirty()
            || tree.bitfield().is_dirty();

        {
            let mut state = inner.state.write();
            state.key = key;
            state.secret = secret;
            state.live = live;
            state.blocks = blocks;
            state.bytes = bytes;
            state.bitfield = bitfield;
            state.tree = tree;
            state.merkle = merkle;
        }
        if needs_sync {
            self.sync(&store).await?;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let committer = tokio::spawn(commit::run(Arc::downgrade(inner), receiver));
        *inner.commits.lock() = Some(sender);
        *inner.committer.lock() = Some(committer);
        *inner.store.write() = Some(store);

        debug!(?key, blocks, bytes, live, writable, "Opened feed");
        Ok(())
    }

    pub(crate) fn store(&self) -> Result<NodeStore<Provider::Backend>, VlogFeedError> {
        self.inner.store.read().clone().ok_or(VlogFeedError::Closed)
    }

    async fn submit<T>(
        &self,
        commit: impl FnOnce(oneshot::Sender<Result<T, VlogFeedError>>) -> Commit,
    ) -> Result<T, VlogFeedError> {
        let (done, receiver) = oneshot::channel();
        {
            let commits = self.inner.commits.lock();
            let sender = commits.as_ref().ok_or(VlogFeedError::Closed)?;
            sender
                .send(commit(done))
                .map_err(|_| VlogFeedError::Closed)?;
        }
        receiver.await.map_err(|_| VlogFeedError::Closed)?
    }

    /// Append one block. Resolves to its index once it is durable.
    pub async fn append(&self, payload: &[u8]) -> Result<u64, VlogFeedError> {
        self.append_batch(vec![payload.to_vec()]).await
    }

    /// Append several blocks as one commit. Resolves to the index of the
    /// first one.
    pub async fn append_batch(&self, batch: Vec<Vec<u8>>) -> Result<u64, VlogFeedError> {
        self.open().await?;
        if !batch.is_empty() && !self.is_writable() {
            return Err(VlogFeedError::NotWritable);
        }
        self.submit(|done| Commit::Append { batch, done }).await
    }

    /// Wait for every commit queued so far. Writes nothing by itself.
    pub async fn flush(&self) -> Result<(), VlogFeedError> {
        self.append_batch(Vec::new()).await.map(|_| ())
    }

    /// Read block `index`. On a read-only feed a block that is not held is
    /// selected for download, and the call waits until a peer delivers a
    /// verified copy.
    pub async fn get(&self, index: u64) -> Result<Vec<u8>, VlogFeedError> {
        self.open().await?;
        if index >= flat::MAX_BLOCKS {
            return Err(VlogFeedError::OutOfRange(index));
        }

        let waiting = {
            let mut state = self.inner.state.write();
            if state.bitfield.get(index) {
                None
            } else if self.inner.closed.load(Ordering::Acquire) {
                return Err(VlogFeedError::Closed);
            } else if state.writable() {
                return Err(VlogFeedError::NotWritable);
            } else {
                let (sender, receiver) = oneshot::channel();
                state.selections.entry(index).or_default().push(sender);
                Some(receiver)
            }
        };

        if let Some(receiver) = waiting {
            debug!(index, "Waiting for block from peers");
            self.update_peers();
            receiver.await.map_err(|_| VlogFeedError::Closed)?;
        }

        self.read_block(index).await
    }

    /// Read block `index` if it is held, without involving peers
    pub async fn get_local(&self, index: u64) -> Result<Option<Vec<u8>>, VlogFeedError> {
        if !self.has(index).await? {
            return Ok(None);
        }
        self.read_block(index).await.map(Some)
    }

    pub(crate) async fn read_block(&self, index: u64) -> Result<Vec<u8>, VlogFeedError> {
        self.store()?.get_data(index).await
    }

    /// Whether block `index` is held locally
    pub async fn has(&self, index: u64) -> Result<bool, VlogFeedError> {
        self.open().await?;
        Ok(self.inner.state.read().bitfield.get(index))
    }

    /// Verify block `index` against the feed's key and, if it checks out,
    /// store it. Nothing is written when verification fails.
    pub async fn put(&self, index: u64, data: Vec<u8>, proof: Proof) -> Result<(), VlogFeedError> {
        self.open().await?;
        self.submit(|done| Commit::Put {
            index,
            data,
            proof,
            done,
        })
        .await
    }

    /// Build the proof for block `index`, leaving out what the requester's
    /// digest says it already holds
    pub async fn proof(&self, index: u64, options: ProofOptions) -> Result<Proof, VlogFeedError> {
        self.open().await?;
        if index >= flat::MAX_BLOCKS {
            return Err(VlogFeedError::OutOfRange(index));
        }
        let plan = {
            let state = self.inner.state.read();
            state
                .tree
                .proof(index * 2, options.digest, &mut TreeIndex::default())
        }
        .ok_or(VlogFeedError::ProofUnavailable(index))?;

        self.load_proof(index, plan).await
    }

    pub(crate) async fn load_proof(
        &self,
        index: u64,
        plan: ProofPlan,
    ) -> Result<Proof, VlogFeedError> {
        let store = self.store()?;
        let live = self.is_live();

        let nodes = try_join_all(plan.nodes.iter().map(|node| store.get_node(*node))).await?;
        let signature = if live && plan.verified_by > 0 {
            let signature = store.get_signature(plan.verified_by - 2).await?;
            Some(signature.ok_or(VlogFeedError::ProofUnavailable(index))?)
        } else {
            None
        };

        Ok(Proof { nodes, signature })
    }

    /// Fix a static feed's key to the checksum of its current roots. After
    /// this the feed no longer accepts appends. On a live feed this only
    /// persists the header.
    pub async fn finalize(&self) -> Result<(), VlogFeedError> {
        self.open().await?;
        self.submit(|done| Commit::Finalize { done }).await
    }

    /// Wait for any in-flight open and queued commits, end every replication
    /// session, fail pending reads and release storage. Idempotent.
    pub async fn close(&self) -> Result<(), VlogFeedError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Err(error) = self.inner.opened.get_or_try_init(|| self.load()).await {
            debug!(%error, "Closing a feed that failed to open");
        }
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        drop(self.inner.commits.lock().take());
        let committer = self.inner.committer.lock().take();
        if let Some(committer) = committer {
            if let Err(error) = committer.await {
                warn!(%error, "Committer task failed");
            }
        }

        let peers = {
            let mut state = self.inner.state.write();
            state.selections.clear();
            state.reservations.clear();
            std::mem::take(&mut state.peers)
        };
        for peer in peers {
            peer.cancel();
        }

        self.inner.store.write().take();
        debug!("Closed feed");
        Ok(())
    }

    pub(crate) fn notify(&self, event: impl Fn(&dyn FeedObserver)) {
        let observers = self.inner.observers.read().clone();
        for observer in observers {
            event(observer.as_ref());
        }
    }
}

/// Re-derive length and presence from what reached storage before a crash:
/// blocks the data bitfield marks past the header's count are adopted, and
/// leaves (with their completed parents) whose records exist but whose bits
/// were lost are marked again.
async fn recover<Backend>(
    store: &NodeStore<Backend>,
    bitfield: &mut Bitfield,
    tree: &mut TreeIndex,
    mut blocks: u64,
) -> Result<u64, VlogFeedError>
where
    Backend: StorageBackend + 'static,
{
    let persisted = blocks;
    while bitfield.get(blocks) {
        blocks += 1;
    }
    if blocks != persisted {
        debug!(persisted, blocks, "Adopted blocks committed after the last header write");
    }

    for block in 0..blocks {
        let leaf = block * 2;
        if bitfield.get(block) && tree.get(leaf) {
            continue;
        }
        if !store.has_node(leaf).await? {
            warn!(block, "Leaf record is missing; truncating");
            return Ok(block);
        }

        bitfield.set(block, true);
        tree.set(leaf);
        let mut index = leaf;
        loop {
            let parent = flat::parent(index);
            if flat::right_span(parent) >= blocks * 2
                || tree.get(parent)
                || !store.has_node(parent).await?
            {
                break;
            }
            tree.set(parent);
            index = parent;
        }
    }

    Ok(blocks)
}
