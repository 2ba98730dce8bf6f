use std::sync::{Arc, Weak, atomic::Ordering};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use vlog_storage::StorageProvider;
use vlog_tree::{flat, rle};

use crate::{
    Feed, FeedInner, FrameSink, FrameStream, Message, Peer, Proof, Transport, VlogFeedError,
};

/// A running replication session
pub struct Replication {
    task: JoinHandle<Result<(), VlogFeedError>>,
    cancel: CancellationToken,
}

impl Replication {
    /// Ask the session to stop. Reservations it held are handed to other
    /// peers.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the session has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end, returning the error that ended it, if
    /// any
    pub async fn finished(self) -> Result<(), VlogFeedError> {
        self.task
            .await
            .map_err(|error| VlogFeedError::Protocol(format!("Replication task failed: {error}")))?
    }
}

impl<Provider> Feed<Provider>
where
    Provider: StorageProvider,
{
    /// Replicate this feed with the peer at the other end of `transport`.
    ///
    /// The session exchanges handshakes and have-bitfields, serves requests
    /// for blocks held here and downloads blocks that local readers are
    /// waiting on. It ends when the transport closes, the session is
    /// cancelled, the feed is closed or the peer misbehaves.
    pub fn replicate<T>(&self, transport: T) -> Replication
    where
        T: Transport,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            Arc::downgrade(&self.inner),
            transport,
            cancel.clone(),
        ));
        Replication { task, cancel }
    }
}

type Delivery = (u64, Vec<u8>, Proof);

async fn run<Provider, T>(
    handle: Weak<FeedInner<Provider>>,
    transport: T,
    cancel: CancellationToken,
) -> Result<(), VlogFeedError>
where
    Provider: StorageProvider,
    T: Transport,
{
    let (mut sink, mut stream) = transport.split();
    let (outbox, mut outgoing) = mpsc::unbounded_channel();

    let (peer, handshake) = {
        let feed = Feed::from_weak(&handle)?;
        feed.open().await?;

        let key = feed.key().ok_or_else(|| {
            VlogFeedError::Protocol("A feed without a key cannot be replicated".into())
        })?;
        let serial = feed.inner.next_peer.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(Peer::new(serial, outbox, cancel.clone()));

        let handshake = Message::Handshake { id: feed.id(), key }.encode()?;
        peer.send(feed.full_have()?);
        feed.inner.state.write().peers.push(peer.clone());

        debug!(peer = serial, %key, "Replication started");
        (peer, handshake)
    };

    // Handshake precedes every other frame and any read
    if let Err(error) = sink.send(handshake).await {
        if let Ok(feed) = Feed::from_weak(&handle) {
            feed.remove_peer(&peer);
        }
        return Err(error);
    }

    let (requests, request_queue) = mpsc::unbounded_channel();
    let (downloads, download_queue) = mpsc::unbounded_channel();

    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = read(&handle, &peer, &mut stream, requests, downloads) => result,
        result = write(&mut sink, &mut outgoing) => result,
        result = serve(&handle, &peer, request_queue) => result,
        result = download(&handle, &peer, download_queue) => result,
    };

    if let Ok(feed) = Feed::from_weak(&handle) {
        feed.remove_peer(&peer);
    }
    match &result {
        Ok(()) => debug!(peer = peer.serial, "Replication ended"),
        Err(error) => warn!(peer = peer.serial, %error, "Replication failed"),
    }
    result
}

async fn read<Provider, S>(
    handle: &Weak<FeedInner<Provider>>,
    peer: &Peer,
    stream: &mut S,
    requests: UnboundedSender<(u64, u64)>,
    downloads: UnboundedSender<Delivery>,
) -> Result<(), VlogFeedError>
where
    Provider: StorageProvider,
    S: FrameStream,
{
    while let Some(frame) = stream.next().await {
        let message = Message::decode(&frame?)?;
        let feed = Feed::from_weak(handle)?;

        match message {
            Message::Handshake { id, key } => {
                if feed.key() != Some(key) {
                    return Err(VlogFeedError::Protocol(format!(
                        "Peer replicates {key}, a different feed"
                    )));
                }
                trace!(peer = peer.serial, remote = %id, "Received handshake");
                peer.remote.lock().id = Some(id);
            }
            Message::Have { start, bitfield } => {
                if start % 8 != 0 {
                    return Err(VlogFeedError::Protocol(format!(
                        "Have starts at block {start}, which is not byte aligned"
                    )));
                }
                let bytes = rle::decode(&bitfield)?;
                peer.remote.lock().bitfield.merge(start / 8, &bytes);
                feed.update_peer(peer);
            }
            Message::Want { start, end } => {
                trace!(peer = peer.serial, start, end, "Ignoring want");
            }
            Message::Request { block, nodes } => {
                requests
                    .send((block, nodes))
                    .map_err(|_| VlogFeedError::Closed)?;
            }
            Message::Data {
                block,
                value,
                nodes,
                signature,
            } => {
                downloads
                    .send((block, value, Proof { nodes, signature }))
                    .map_err(|_| VlogFeedError::Closed)?;
            }
        }
    }
    Ok(())
}

async fn write<S>(
    sink: &mut S,
    outgoing: &mut UnboundedReceiver<Message>,
) -> Result<(), VlogFeedError>
where
    S: FrameSink,
{
    while let Some(message) = outgoing.recv().await {
        sink.send(message.encode()?).await?;
    }
    Ok(())
}

/// Answer requests one at a time, in arrival order
async fn serve<Provider>(
    handle: &Weak<FeedInner<Provider>>,
    peer: &Peer,
    mut queue: UnboundedReceiver<(u64, u64)>,
) -> Result<(), VlogFeedError>
where
    Provider: StorageProvider,
{
    while let Some((block, digest)) = queue.recv().await {
        let feed = Feed::from_weak(handle)?;
        let plan = {
            let state = feed.inner.state.read();
            if block >= flat::MAX_BLOCKS || !state.bitfield.get(block) {
                return Err(VlogFeedError::Protocol(format!(
                    "Peer requested block {block}, which is not held here"
                )));
            }
            let mut remote = peer.remote.lock();
            state.tree.proof(block * 2, digest, &mut remote.tree)
        };
        let Some(plan) = plan else {
            debug!(peer = peer.serial, block, "Can not prove requested block");
            continue;
        };

        let (proof, value) =
            futures_util::try_join!(feed.load_proof(block, plan), feed.read_block(block))?;

        trace!(peer = peer.serial, block, nodes = proof.nodes.len(), "Serving block");
        feed.notify(|observer| observer.on_upload(block, &value));
        peer.send(Message::Data {
            block,
            value,
            nodes: proof.nodes,
            signature: proof.signature,
        });
    }
    Ok(())
}

/// Verify and store delivered blocks one at a time, in arrival order
async fn download<Provider>(
    handle: &Weak<FeedInner<Provider>>,
    peer: &Peer,
    mut queue: UnboundedReceiver<Delivery>,
) -> Result<(), VlogFeedError>
where
    Provider: StorageProvider,
{
    while let Some((block, value, proof)) = queue.recv().await {
        let feed = Feed::from_weak(handle)?;
        trace!(peer = peer.serial, block, "Received block");
        feed.put(block, value, proof).await?;
        feed.update_peer(peer);
    }
    Ok(())
}
