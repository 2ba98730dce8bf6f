use std::time::Duration;

use anyhow::{Result, anyhow};
use pretty_assertions::assert_eq;
use tokio::time::timeout;
use vlog_common::Hash;
use vlog_feed::{
    ChannelSink, ChannelStream, ChannelTransport, Feed, FeedOptions, FrameSink, FrameStream, Message, ProofOptions,
    PublicKey, Replication, StreamTransport, Transport, VlogFeedError,
};
use vlog_storage::{MemoryStorageProvider, StorageProvider};
use vlog_tree::rle;

const PATIENCE: Duration = Duration::from_secs(10);

async fn writer_with_blocks(count: u64) -> Result<Feed<MemoryStorageProvider>> {
    let feed = Feed::new(MemoryStorageProvider::default(), FeedOptions::default());
    for index in 0..count {
        feed.append(format!("block {index}").as_bytes()).await?;
    }
    Ok(feed)
}

fn reader_of<P: StorageProvider>(writer: &Feed<P>) -> Result<Feed<MemoryStorageProvider>> {
    let key = writer
        .key()
        .ok_or_else(|| anyhow::anyhow!("writer has no key"))?;
    Ok(Feed::with_key(
        key,
        MemoryStorageProvider::default(),
        FeedOptions::default(),
    ))
}

/// The hand-driven far end of a session
struct RawPeer {
    sink: ChannelSink,
    stream: ChannelStream,
}

impl RawPeer {
    /// Connect to `feed` and introduce ourselves as a replica of `key`
    async fn connect(
        feed: &Feed<MemoryStorageProvider>,
        key: PublicKey,
    ) -> Result<(Self, Replication)> {
        let (local, remote) = ChannelTransport::pair();
        let session = feed.replicate(local);
        let (sink, stream) = remote.split();
        let mut peer = RawPeer { sink, stream };
        peer.send(Message::Handshake {
            id: Hash::digest(b"raw peer"),
            key,
        })
        .await?;
        Ok((peer, session))
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        self.sink.send(message.encode()?).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message> {
        let frame = timeout(PATIENCE, self.stream.next())
            .await?
            .ok_or_else(|| anyhow!("Session hung up"))??;
        Ok(Message::decode(&frame)?)
    }

    /// Skip ahead to the next request and return the block it asks for
    async fn requested(&mut self) -> Result<u64> {
        loop {
            if let Message::Request { block, .. } = self.receive().await? {
                return Ok(block);
            }
        }
    }
}

#[test_log::test(tokio::test)]
async fn it_downloads_every_block_from_a_writer() -> Result<()> {
    let writer = writer_with_blocks(10).await?;
    let reader = reader_of(&writer)?;

    let (left, right) = ChannelTransport::pair();
    let _upstream = writer.replicate(left);
    let _downstream = reader.replicate(right);

    for index in (0..10).rev() {
        let block = timeout(PATIENCE, reader.get(index)).await??;
        assert_eq!(block, writer.get(index).await?);
    }
    assert_eq!(reader.blocks(), 10);
    assert_eq!(reader.bytes(), writer.bytes());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_follows_blocks_appended_during_replication() -> Result<()> {
    let writer = writer_with_blocks(2).await?;
    let reader = reader_of(&writer)?;

    let (left, right) = ChannelTransport::pair();
    let _upstream = writer.replicate(left);
    let _downstream = reader.replicate(right);

    let waiting = tokio::spawn({
        let reader = reader.clone();
        async move { reader.get(3).await }
    });

    writer.append(b"third").await?;
    writer.append(b"fourth").await?;

    assert_eq!(timeout(PATIENCE, waiting).await???, b"fourth");
    assert_eq!(reader.blocks(), 4);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_relays_blocks_through_another_reader() -> Result<()> {
    let writer = writer_with_blocks(5).await?;
    let relay = reader_of(&writer)?;
    let reader = reader_of(&writer)?;

    let (left, right) = ChannelTransport::pair();
    let _upstream = writer.replicate(left);
    let _relay_up = relay.replicate(right);
    for index in 0..5 {
        timeout(PATIENCE, relay.get(index)).await??;
    }

    let (left, right) = ChannelTransport::pair();
    let _relay_down = relay.replicate(left);
    let _downstream = reader.replicate(right);
    for index in 0..5 {
        let block = timeout(PATIENCE, reader.get(index)).await??;
        assert_eq!(block, format!("block {index}").into_bytes());
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_replicates_over_a_byte_stream() -> Result<()> {
    let writer = writer_with_blocks(3).await?;
    let reader = reader_of(&writer)?;

    let (left, right) = tokio::io::duplex(64 * 1024);
    let _upstream = writer.replicate(StreamTransport::new(left));
    let _downstream = reader.replicate(StreamTransport::new(right));

    let block = timeout(PATIENCE, reader.get(1)).await??;
    assert_eq!(block, b"block 1");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_ends_sessions_between_different_feeds() -> Result<()> {
    let first = writer_with_blocks(1).await?;
    let second = writer_with_blocks(1).await?;

    let (left, right) = ChannelTransport::pair();
    let one = first.replicate(left);
    let two = second.replicate(right);

    assert!(matches!(
        timeout(PATIENCE, one.finished()).await?,
        Err(VlogFeedError::Protocol(_))
    ));
    assert!(timeout(PATIENCE, two.finished()).await?.is_err());
    assert_eq!(first.peers(), 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_fetches_a_block_again_after_a_peer_forges_it() -> Result<()> {
    let writer = writer_with_blocks(4).await?;
    let reader = reader_of(&writer)?;
    let key = writer.key().ok_or_else(|| anyhow!("writer has no key"))?;

    let (mut forger, forged_session) = RawPeer::connect(&reader, key).await?;
    forger
        .send(Message::Have {
            start: 0,
            bitfield: rle::encode(&[0xff])?,
        })
        .await?;

    let waiting = tokio::spawn({
        let reader = reader.clone();
        async move { reader.get(2).await }
    });
    assert_eq!(forger.requested().await?, 2);
    assert_eq!(reader.peers(), 1);

    let proof = writer.proof(2, ProofOptions::default()).await?;
    forger
        .send(Message::Data {
            block: 2,
            value: b"forged".to_vec(),
            nodes: proof.nodes,
            signature: proof.signature,
        })
        .await?;

    assert_eq!(
        timeout(PATIENCE, forged_session.finished()).await?,
        Err(VlogFeedError::VerificationFailed)
    );
    assert_eq!(reader.peers(), 0);
    assert!(!reader.has(2).await?);
    assert!(!waiting.is_finished());

    let (left, right) = ChannelTransport::pair();
    let _upstream = writer.replicate(left);
    let _downstream = reader.replicate(right);

    assert_eq!(timeout(PATIENCE, waiting).await???, b"block 2");
    assert_eq!(reader.peers(), 1);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_ends_sessions_with_peers_that_break_protocol() -> Result<()> {
    let writer = writer_with_blocks(2).await?;
    let reader = reader_of(&writer)?;
    let key = writer.key().ok_or_else(|| anyhow!("writer has no key"))?;

    let (mut garbled, session) = RawPeer::connect(&reader, key).await?;
    garbled.sink.send(vec![0xff, 0x00, 0x13]).await?;
    assert!(matches!(
        timeout(PATIENCE, session.finished()).await?,
        Err(VlogFeedError::Protocol(_))
    ));
    assert_eq!(reader.peers(), 0);

    let (mut greedy, session) = RawPeer::connect(&writer, key).await?;
    greedy
        .send(Message::Request {
            block: 9,
            nodes: 0,
        })
        .await?;
    assert!(matches!(
        timeout(PATIENCE, session.finished()).await?,
        Err(VlogFeedError::Protocol(_))
    ));
    assert_eq!(writer.peers(), 0);
    assert_eq!(writer.append(b"after").await?, 2);

    let (mut reckless, session) = RawPeer::connect(&reader, key).await?;
    let mut proof = writer.proof(0, ProofOptions::default()).await?;
    reckless
        .send(Message::Data {
            block: u64::MAX,
            value: b"block 0".to_vec(),
            nodes: proof.nodes.clone(),
            signature: proof.signature,
        })
        .await?;
    assert_eq!(
        timeout(PATIENCE, session.finished()).await?,
        Err(VlogFeedError::VerificationFailed)
    );

    let (mut oversized, session) = RawPeer::connect(&reader, key).await?;
    let mut nodes = proof.nodes.clone();
    nodes[0].size = u64::MAX;
    oversized
        .send(Message::Data {
            block: 0,
            value: b"block 0".to_vec(),
            nodes,
            signature: proof.signature,
        })
        .await?;
    assert_eq!(
        timeout(PATIENCE, session.finished()).await?,
        Err(VlogFeedError::VerificationFailed)
    );
    assert_eq!(reader.peers(), 0);

    proof = writer.proof(0, ProofOptions::default()).await?;
    reader.put(0, b"block 0".to_vec(), proof).await?;
    assert_eq!(reader.get(0).await?, b"block 0");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_stops_a_cancelled_session() -> Result<()> {
    let writer = writer_with_blocks(1).await?;
    let reader = reader_of(&writer)?;

    let (left, right) = ChannelTransport::pair();
    let upstream = writer.replicate(left);
    let _downstream = reader.replicate(right);

    timeout(PATIENCE, reader.get(0)).await??;
    assert_eq!(writer.peers(), 1);

    upstream.cancel();
    timeout(PATIENCE, upstream.finished()).await??;
    assert_eq!(writer.peers(), 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_fails_pending_reads_when_closed() -> Result<()> {
    let writer = writer_with_blocks(1).await?;
    let reader = reader_of(&writer)?;
    reader.open().await?;

    let waiting = tokio::spawn({
        let reader = reader.clone();
        async move { reader.get(0).await }
    });
    tokio::task::yield_now().await;

    reader.close().await?;
    assert_eq!(
        timeout(PATIENCE, waiting).await??,
        Err(VlogFeedError::Closed)
    );
    Ok(())
}
