use std::sync::Weak;

use futures_util::future::try_join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use vlog_storage::StorageProvider;
use vlog_tree::{Node, flat};

use super::{Feed, FeedInner};
use crate::{BitfieldKind, NodeStore, Proof, PublicKey, Verified, VlogFeedError, verify};

/// A mutation waiting for the committer
pub(crate) enum Commit {
    Append {
        batch: Vec<Vec<u8>>,
        done: oneshot::Sender<Result<u64, VlogFeedError>>,
    },
    Put {
        index: u64,
        data: Vec<u8>,
        proof: Proof,
        done: oneshot::Sender<Result<(), VlogFeedError>>,
    },
    Finalize {
        done: oneshot::Sender<Result<(), VlogFeedError>>,
    },
}

/// Apply commits one at a time, in the order they were queued. Ends when the
/// feed is closed or dropped.
pub(crate) async fn run<Provider>(
    feed: Weak<FeedInner<Provider>>,
    mut commits: mpsc::UnboundedReceiver<Commit>,
) where
    Provider: StorageProvider,
{
    while let Some(commit) = commits.recv().await {
        let Ok(feed) = Feed::from_weak(&feed) else {
            break;
        };

        match commit {
            Commit::Append { batch, done } => {
                let _ = done.send(feed.commit_append(batch).await);
            }
            Commit::Put {
                index,
                data,
                proof,
                done,
            } => {
                let _ = done.send(feed.commit_put(index, data, proof).await);
            }
            Commit::Finalize { done } => {
                let _ = done.send(feed.commit_finalize().await);
            }
        }
    }
    trace!("Committer stopped");
}

impl<Provider> Feed<Provider>
where
    Provider: StorageProvider,
{
    async fn commit_append(&self, batch: Vec<Vec<u8>>) -> Result<u64, VlogFeedError> {
        let (mut merkle, secret, start, mut offset) = {
            let state = self.inner.state.read();
            if batch.is_empty() {
                return Ok(state.blocks);
            }
            if !state.writable() {
                return Err(VlogFeedError::NotWritable);
            }
            let secret = state.secret.clone().filter(|_| state.live);
            (state.merkle.clone(), secret, state.blocks, state.bytes)
        };
        let store = self.store()?;

        let mut nodes = Vec::new();
        let mut payloads = Vec::with_capacity(batch.len());
        for data in &batch {
            let created = merkle
                .next(data)
                .map_err(|_| VlogFeedError::OutOfRange(merkle.blocks()))?;
            let signature = secret
                .as_ref()
                .map(|secret| secret.sign(&merkle.checksum()));

            let leaf = created[0];
            payloads.push((offset, leaf, data.as_slice()));
            offset += leaf.size;

            for (position, node) in created.into_iter().enumerate() {
                nodes.push((node, signature.filter(|_| position == 0)));
            }
        }

        futures_util::try_join!(
            try_join_all(
                nodes
                    .iter()
                    .map(|(node, signature)| store.put_node(node, signature.as_ref()))
            ),
            try_join_all(
                payloads
                    .iter()
                    .map(|(offset, leaf, data)| store.put_data(*offset, leaf, data))
            ),
        )?;

        let count = batch.len() as u64;
        {
            let mut state = self.inner.state.write();
            for (node, _) in &nodes {
                state.tree.set(node.index);
            }
            for block in start..start + count {
                state.bitfield.set(block, true);
            }
            state.blocks = merkle.blocks();
            state.bytes = merkle.bytes();
            state.merkle = merkle;
        }
        self.sync(&store).await?;

        debug!(start, count, "Appended blocks");
        self.notify(|observer| observer.on_append(start, count));
        self.broadcast_have(start, start + count);
        Ok(start)
    }

    async fn commit_put(
        &self,
        index: u64,
        data: Vec<u8>,
        proof: Proof,
    ) -> Result<(), VlogFeedError> {
        if index >= flat::MAX_BLOCKS {
            debug!(index, "Block lies outside the addressable tree");
            return Err(VlogFeedError::VerificationFailed);
        }
        let (key, resolution) = {
            let state = self.inner.state.read();
            if state.bitfield.get(index) {
                return Ok(());
            }
            if state.writable() {
                return Err(VlogFeedError::NotWritable);
            }
            let key = state.key.ok_or(VlogFeedError::VerificationFailed)?;
            let indexes = proof.nodes.iter().map(|node| node.index).collect::<Vec<_>>();
            (key, state.tree.resolve(index * 2, &indexes))
        };
        let store = self.store()?;

        let (missing, trusted) = futures_util::try_join!(
            try_join_all(resolution.missing.iter().map(|node| store.get_node(*node))),
            async {
                match resolution.trusted {
                    Some(node) => store.get_node(node).await.map(Some),
                    None => Ok(None),
                }
            },
        )?;

        let verified = verify(&key, index, &data, &proof, &missing, trusted.as_ref())?;
        let writes = {
            let state = self.inner.state.read();
            verified
                .writes
                .iter()
                .filter(|node| !state.tree.get(node.index))
                .copied()
                .collect::<Vec<_>>()
        };

        self.store_verified(&store, &key, index, &data, &verified, &writes)
            .await?;

        let waiters = {
            let mut state = self.inner.state.write();
            for node in &writes {
                state.tree.set(node.index);
            }
            state.bitfield.set(index, true);
            if let Some(frontier) = &verified.frontier {
                if frontier.verified_by / 2 > state.blocks {
                    state.blocks = frontier.verified_by / 2;
                    state.bytes = frontier.bytes;
                }
            }
            state.reservations.remove(&index);
            state.selections.remove(&index).unwrap_or_default()
        };

        let synced = self.sync(&store).await;
        for waiter in waiters {
            let _ = waiter.send(());
        }
        synced?;

        trace!(index, nodes = writes.len(), "Stored verified block");
        self.notify(|observer| observer.on_download(index, &data));
        self.broadcast_have(index, index + 1);
        Ok(())
    }

    async fn store_verified(
        &self,
        store: &NodeStore<Provider::Backend>,
        key: &PublicKey,
        index: u64,
        data: &[u8],
        verified: &Verified,
        writes: &[Node],
    ) -> Result<(), VlogFeedError> {
        let signature = verified.frontier.as_ref().and_then(|frontier| {
            frontier
                .signature
                .map(|signature| (frontier.verified_by - 2, signature))
        });
        let signed_leaf_written =
            signature.is_some_and(|(slot, _)| writes.iter().any(|node| node.index == slot));
        let offset = store.data_offset(index, &verified.writes).await?;

        futures_util::try_join!(
            try_join_all(writes.iter().map(|node| {
                let signature = signature
                    .as_ref()
                    .filter(|(slot, _)| *slot == node.index)
                    .map(|(_, signature)| signature);
                store.put_node(node, signature)
            })),
            async {
                match signature {
                    Some((slot, signature)) if !signed_leaf_written => {
                        store.put_signature(slot, &signature).await
                    }
                    _ => Ok(()),
                }
            },
            store.put_data(offset, &verified.leaf, data),
        )?;

        trace!(%key, index, offset, "Persisted block");
        Ok(())
    }

    async fn commit_finalize(&self) -> Result<(), VlogFeedError> {
        let finalized = {
            let mut state = self.inner.state.write();
            if !state.live && state.key.is_none() {
                let key = PublicKey::from(state.merkle.checksum());
                state.key = Some(key);
                Some(key)
            } else {
                None
            }
        };

        let store = self.store()?;
        self.sync(&store).await?;
        if let Some(key) = finalized {
            debug!(%key, "Finalized static feed");
        }
        Ok(())
    }

    /// Persist dirty bitfield pages, then the header
    pub(crate) async fn sync(
        &self,
        store: &NodeStore<Provider::Backend>,
    ) -> Result<(), VlogFeedError> {
        let (data_pages, tree_pages, header) = {
            let state = self.inner.state.read();
            (
                state.bitfield.dirty_pages(),
                state.tree.bitfield().dirty_pages(),
                state.header(),
            )
        };

        futures_util::try_join!(
            store.write_pages(BitfieldKind::Data, &data_pages),
            store.write_pages(BitfieldKind::Tree, &tree_pages),
        )?;
        store.write_header(&header).await?;

        let mut state = self.inner.state.write();
        for (page, _) in &data_pages {
            state.bitfield.mark_clean(*page);
        }
        for (page, _) in &tree_pages {
            state.tree.bitfield_mut().mark_clean(*page);
        }
        Ok(())
    }
}
