use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::VlogFeedError;

/// Frames buffered in each direction of a [ChannelTransport]
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// The outgoing half of a [Transport]
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one frame, waiting if the transport applies backpressure
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), VlogFeedError>;
}

/// The incoming half of a [Transport]
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// The next frame, or `None` once the remote end has closed
    async fn next(&mut self) -> Option<Result<Vec<u8>, VlogFeedError>>;
}

/// A reliable, ordered, message-framed duplex channel to one peer
pub trait Transport: Send + 'static {
    /// Outgoing half
    type Sink: FrameSink;
    /// Incoming half
    type Stream: FrameStream;

    /// Split into independently driven halves
    fn split(self) -> (Self::Sink, Self::Stream);
}

/// An in-process transport made of two bounded channels
pub struct ChannelTransport {
    sink: ChannelSink,
    stream: ChannelStream,
}

impl ChannelTransport {
    /// Two connected ends
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Two connected ends, each buffering up to `capacity` frames
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (left_sender, left_receiver) = mpsc::channel(capacity);
        let (right_sender, right_receiver) = mpsc::channel(capacity);
        (
            Self {
                sink: ChannelSink(left_sender),
                stream: ChannelStream(right_receiver),
            },
            Self {
                sink: ChannelSink(right_sender),
                stream: ChannelStream(left_receiver),
            },
        )
    }
}

impl Transport for ChannelTransport {
    type Sink = ChannelSink;
    type Stream = ChannelStream;

    fn split(self) -> (Self::Sink, Self::Stream) {
        (self.sink, self.stream)
    }
}

/// Outgoing half of a [ChannelTransport]
pub struct ChannelSink(mpsc::Sender<Vec<u8>>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), VlogFeedError> {
        self.0
            .send(frame)
            .await
            .map_err(|_| VlogFeedError::Protocol("Remote end of the channel is closed".into()))
    }
}

/// Incoming half of a [ChannelTransport]
pub struct ChannelStream(mpsc::Receiver<Vec<u8>>);

#[async_trait]
impl FrameStream for ChannelStream {
    async fn next(&mut self) -> Option<Result<Vec<u8>, VlogFeedError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Frames messages over any byte stream (a TCP socket, a pipe) with a
/// length prefix
pub struct StreamTransport<Io> {
    io: Io,
}

impl<Io> StreamTransport<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a connected byte stream
    pub fn new(io: Io) -> Self {
        Self { io }
    }
}

impl<Io> Transport for StreamTransport<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Sink = StreamSink<Io>;
    type Stream = StreamSource<Io>;

    fn split(self) -> (Self::Sink, Self::Stream) {
        let (sink, stream) = Framed::new(self.io, LengthDelimitedCodec::new()).split();
        (StreamSink(sink), StreamSource(stream))
    }
}

/// Outgoing half of a [StreamTransport]
pub struct StreamSink<Io>(SplitSink<Framed<Io, LengthDelimitedCodec>, Bytes>);

#[async_trait]
impl<Io> FrameSink for StreamSink<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), VlogFeedError> {
        self.0
            .send(Bytes::from(frame))
            .await
            .map_err(|error| VlogFeedError::Protocol(format!("Could not send frame: {error}")))
    }
}

/// Incoming half of a [StreamTransport]
pub struct StreamSource<Io>(SplitStream<Framed<Io, LengthDelimitedCodec>>);

#[async_trait]
impl<Io> FrameStream for StreamSource<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next(&mut self) -> Option<Result<Vec<u8>, VlogFeedError>> {
        self.0.next().await.map(|frame| {
            frame
                .map(|frame| frame.to_vec())
                .map_err(|error| VlogFeedError::Protocol(format!("Could not read frame: {error}")))
        })
    }
}
