use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use vlog_common::Hash;
use vlog_storage::StorageProvider;
use vlog_tree::{Bitfield, TreeIndex, flat, rle};

use crate::{Feed, Message, VlogFeedError};

/// What this side knows about a peer
#[derive(Default)]
pub(crate) struct RemoteState {
    pub id: Option<Hash>,
    /// Blocks the peer has announced
    pub bitfield: Bitfield,
    /// Tree nodes the peer is known to hold, learned from request digests
    pub tree: TreeIndex,
}

/// One replication session, as seen from the feed
pub(crate) struct Peer {
    pub serial: u64,
    pub remote: Mutex<RemoteState>,
    outbox: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

impl Peer {
    pub fn new(
        serial: u64,
        outbox: mpsc::UnboundedSender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            serial,
            remote: Mutex::new(RemoteState::default()),
            outbox,
            cancel,
        }
    }

    /// Queue a message for the session's writer
    pub fn send(&self, message: Message) {
        if self.outbox.send(message).is_err() {
            trace!(peer = self.serial, "Dropping message for a finished session");
        }
    }

    /// End the session
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<Provider> Feed<Provider>
where
    Provider: StorageProvider,
{
    /// A [Message::Have] announcing every block held
    pub(crate) fn full_have(&self) -> Result<Message, VlogFeedError> {
        let bytes = self.inner.state.read().bitfield.to_bytes();
        Ok(Message::Have {
            start: 0,
            bitfield: rle::encode(&bytes)?,
        })
    }

    /// Announce blocks `start..end` to every peer
    pub(crate) fn broadcast_have(&self, start: u64, end: u64) {
        let (have, peers) = {
            let state = self.inner.state.read();
            if state.peers.is_empty() {
                return;
            }
            let start = start - start % 8;
            let bytes = state.bitfield.bytes(start / 8, end.div_ceil(8));
            let have = rle::encode(&bytes).map(|bitfield| Message::Have { start, bitfield });
            (have, state.peers.clone())
        };

        match have {
            Ok(have) => {
                for peer in peers {
                    peer.send(have.clone());
                }
            }
            Err(error) => warn!(%error, "Could not encode have"),
        }
    }

    pub(crate) fn update_peers(&self) {
        let peers = self.inner.state.read().peers.clone();
        for peer in peers {
            self.update_peer(&peer);
        }
    }

    /// Request every selected block this peer can serve that is not already
    /// requested from someone
    pub(crate) fn update_peer(&self, peer: &Peer) {
        let requests = {
            let mut state = self.inner.state.write();
            let remote = peer.remote.lock();

            let blocks = state
                .selections
                .keys()
                .copied()
                .filter(|block| {
                    *block < flat::MAX_BLOCKS
                        && !state.bitfield.get(*block)
                        && !state.reservations.contains_key(block)
                        && remote.bitfield.get(*block)
                })
                .collect::<Vec<_>>();

            blocks
                .into_iter()
                .map(|block| {
                    state.reservations.insert(block, peer.serial);
                    Message::Request {
                        block,
                        nodes: state.tree.digest(block * 2),
                    }
                })
                .collect::<Vec<_>>()
        };

        for request in requests {
            trace!(peer = peer.serial, ?request, "Requesting");
            peer.send(request);
        }
    }

    /// Forget a finished session. Blocks reserved for it are requested from
    /// the remaining peers.
    pub(crate) fn remove_peer(&self, peer: &Arc<Peer>) {
        let remaining = {
            let mut state = self.inner.state.write();
            state.peers.retain(|other| !Arc::ptr_eq(other, peer));
            state
                .reservations
                .retain(|_, serial| *serial != peer.serial);
            state.peers.clone()
        };

        for other in remaining {
            self.update_peer(&other);
        }
    }
}
