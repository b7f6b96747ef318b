//! Framed packet stream over any async byte transport.
//!
//! A [`Stream`] owns one socket. On construction it performs the one-byte
//! version handshake (reading the peer's version when accepting, writing
//! its own when connecting); every byte after that is ULEB128
//! length-prefixed frames.
//!
//! The receive path accumulates bytes in a growable buffer and repeatedly
//! peels complete frames off the front. The handler is awaited before the
//! next frame is decoded, so packet processing is strictly in-order per
//! connection. Any framing or decode error tears the stream down.
//!
//! The send path serializes writes through a single writer task; each frame
//! goes out as one contiguous write. An optional fast-path hook lets
//! latency-sensitive packets (heartbeat pings) be answered directly from
//! the read loop without waiting on the main handler.

use std::{
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::BytesMut;
use cadenza_proto::{CodecError, FrameCodec, Wire};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};

/// Errors produced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Socket-level failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or decode failure; the stream is closed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peer's protocol version is not accepted.
    #[error("unsupported-protocol-version:{0}")]
    UnsupportedVersion(u8),

    /// The peer closed the connection before completing the handshake.
    #[error("connection closed during handshake")]
    HandshakeEof,

    /// The stream is already closed.
    #[error("stream closed")]
    Closed,
}

/// Receiver half of a [`Stream`]: invoked from the read task.
///
/// `on_frame` fires for every decoded frame, including fast-path ones, and
/// is where activity tracking belongs. `handle` is awaited before the next
/// frame is taken off the buffer. `on_close` fires exactly once when the
/// read loop exits, whether by EOF, error, or local close.
#[async_trait]
pub trait PacketHandler<R>: Send + Sync + 'static {
    /// A frame arrived (any frame, before dispatch).
    fn on_frame(&self) {}

    /// Process one inbound packet.
    async fn handle(&self, packet: R);

    /// The stream is gone.
    async fn on_close(&self) {}
}

/// Shortcut applied in the read loop before the main handler: return
/// `Some(reply)` to answer immediately and skip `handle` entirely.
pub type FastPath<S, R> = fn(&R) -> Option<S>;

/// Transport configuration.
#[derive(Debug)]
pub struct StreamConfig<S, R> {
    /// Framing codec (payload cap).
    pub codec: FrameCodec,
    /// Optional read-loop shortcut.
    pub fast_path: Option<FastPath<S, R>>,
}

// Unconditionally copyable: the payload types only appear behind a fn
// pointer. Derives would demand `S: Copy + Clone` for nothing.
impl<S, R> Clone for StreamConfig<S, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, R> Copy for StreamConfig<S, R> {}

impl<S, R> Default for StreamConfig<S, R> {
    fn default() -> Self {
        Self { codec: FrameCodec::new(), fast_path: None }
    }
}

/// A framed, version-negotiated packet stream sending `S` and receiving
/// `R`.
#[derive(Debug)]
pub struct Stream<S, R> {
    send_tx: mpsc::Sender<Vec<u8>>,
    codec: FrameCodec,
    peer_version: u8,
    closed: Arc<AtomicBool>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
    _marker: PhantomData<fn(S) -> R>,
}

impl<S, R> Stream<S, R>
where
    S: Wire + Send + Sync + 'static,
    R: Wire + Send + 'static,
{
    /// Server role: read the peer's version byte, validate it against
    /// `accepted`, then start pumping frames.
    pub async fn accept<T>(
        io: T,
        accepted: &[u8],
        handler: Arc<dyn PacketHandler<R>>,
        config: StreamConfig<S, R>,
    ) -> Result<Self, StreamError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, writer) = tokio::io::split(io);

        let mut version = [0u8; 1];
        let read = tokio::time::timeout(crate::DISCONNECT_TIMEOUT, reader.read(&mut version))
            .await
            .map_err(|_| StreamError::HandshakeEof)??;
        if read == 0 {
            return Err(StreamError::HandshakeEof);
        }
        let version = version[0];
        if !accepted.contains(&version) {
            return Err(StreamError::UnsupportedVersion(version));
        }

        Ok(Self::start(reader, writer, version, handler, config))
    }

    /// Client role: write our version byte first, then start pumping
    /// frames.
    pub async fn connect<T>(
        io: T,
        version: u8,
        handler: Arc<dyn PacketHandler<R>>,
        config: StreamConfig<S, R>,
    ) -> Result<Self, StreamError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, mut writer) = tokio::io::split(io);
        writer.write_all(&[version]).await?;
        writer.flush().await?;

        Ok(Self::start(reader, writer, version, handler, config))
    }

    fn start<RH, WH>(
        reader: RH,
        writer: WH,
        peer_version: u8,
        handler: Arc<dyn PacketHandler<R>>,
        config: StreamConfig<S, R>,
    ) -> Self
    where
        RH: AsyncRead + Send + Unpin + 'static,
        WH: AsyncWrite + Send + Unpin + 'static,
    {
        let closed = Arc::new(AtomicBool::new(false));
        let (send_tx, send_rx) = mpsc::channel::<Vec<u8>>(256);

        let write_task = tokio::spawn(write_loop(writer, send_rx, Arc::clone(&closed)));
        let read_task = tokio::spawn(read_loop(
            reader,
            handler,
            config,
            send_tx.clone(),
            Arc::clone(&closed),
        ));

        Self {
            send_tx,
            codec: config.codec,
            peer_version,
            closed,
            read_task,
            write_task,
            _marker: PhantomData,
        }
    }

    /// Version negotiated with the peer.
    pub fn peer_version(&self) -> u8 {
        self.peer_version
    }

    /// Whether the stream has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Encode and enqueue one outbound packet.
    pub async fn send(&self, payload: &S) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        let framed = self.codec.encode(&payload.to_wire_bytes());
        self.send_tx.send(framed).await.map_err(|_| StreamError::Closed)
    }

    /// Encode and enqueue without waiting for queue capacity.
    ///
    /// Used by broadcast fan-out: enqueueing is non-blocking so a slow
    /// recipient cannot stall the caller. A full queue counts as a failed
    /// write; the frame is dropped for that recipient only.
    pub fn try_send(&self, payload: &S) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        let framed = self.codec.encode(&payload.to_wire_bytes());
        self.send_tx.try_send(framed).map_err(|_| StreamError::Closed)
    }

}

impl<S, R> Stream<S, R> {
    /// Tear the stream down locally. Idempotent; pending writes are
    /// dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.read_task.abort();
        self.write_task.abort();
    }
}

impl<S, R> Drop for Stream<S, R> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop<WH>(mut writer: WH, mut rx: mpsc::Receiver<Vec<u8>>, closed: Arc<AtomicBool>)
where
    WH: AsyncWrite + Send + Unpin + 'static,
{
    while let Some(frame) = rx.recv().await {
        if writer.write_all(&frame).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
    closed.store(true, Ordering::Release);
}

async fn read_loop<RH, S, R>(
    mut reader: RH,
    handler: Arc<dyn PacketHandler<R>>,
    config: StreamConfig<S, R>,
    send_tx: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
) where
    RH: AsyncRead + Send + Unpin + 'static,
    S: Wire + Send + Sync + 'static,
    R: Wire + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(4096);

    'outer: loop {
        loop {
            let payload = match config.codec.try_decode(&mut buf) {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!("framing error, closing stream: {err}");
                    break 'outer;
                },
            };
            let packet = match R::from_wire_bytes(&payload) {
                Ok(packet) => packet,
                Err(err) => {
                    tracing::warn!("decode error, closing stream: {err}");
                    break 'outer;
                },
            };

            handler.on_frame();
            if let Some(fast) = config.fast_path {
                if let Some(reply) = fast(&packet) {
                    let framed = config.codec.encode(&reply.to_wire_bytes());
                    if send_tx.send(framed).await.is_err() {
                        break 'outer;
                    }
                    continue;
                }
            }
            handler.handle(packet).await;
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {},
            Err(err) => {
                tracing::debug!("read error, closing stream: {err}");
                break;
            },
        }
    }

    closed.store(true, Ordering::Release);
    handler.on_close().await;
}
