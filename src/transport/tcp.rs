//! Framed byte-stream transport to a lamp.
//!
//! [`FrameTransport`] wraps any `AsyncRead + AsyncWrite` stream in the
//! [`FrameCodec`] and bounds every send and receive with a timeout. TCP is
//! the production stream; tests drive the same code over `tokio::io::duplex`.

use crate::core::codec::FrameCodec;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{with_timeout_error, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SEND_TIMEOUT};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

/// Open a TCP connection to the lamp, bounded by `connect_timeout`
#[instrument(level = "debug")]
pub async fn connect(address: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = with_timeout_error(
        async {
            TcpStream::connect((address, port))
                .await
                .map_err(ProtocolError::Io)
        },
        connect_timeout,
    )
    .await?;

    // Frames are small request/response pairs
    stream.set_nodelay(true)?;
    debug!(peer = ?stream.peer_addr().ok(), "TCP connection established");
    Ok(stream)
}

pub struct FrameTransport<T> {
    framed: Framed<T, FrameCodec>,
    send_timeout: Duration,
    recv_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl<T> FrameTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: T, codec: FrameCodec) -> Self {
        Self {
            framed: Framed::new(stream, codec),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            recv_timeout: DEFAULT_RESPONSE_TIMEOUT,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Set custom timeout durations
    pub fn with_timeouts(mut self, send_timeout: Duration, recv_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self.recv_timeout = recv_timeout;
        self
    }

    /// Share a metrics collector with the owner of this transport
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    /// Write one encoded frame
    #[instrument(skip(self, frame), fields(len = frame.len()), level = "trace")]
    pub async fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        let len = frame.len() as u64;
        with_timeout_error(self.framed.send(frame), self.send_timeout).await?;
        self.metrics.frame_sent(len);
        Ok(())
    }

    /// Wait for the next complete frame
    #[instrument(skip(self), level = "trace")]
    pub async fn recv_frame(&mut self) -> Result<BytesMut> {
        let recv_timeout = self.recv_timeout;
        let framed = &mut self.framed;
        let frame = with_timeout_error(
            async { framed.next().await.ok_or(ProtocolError::ConnectionClosed)? },
            recv_timeout,
        )
        .await?;

        self.metrics.frame_received(frame.len() as u64);
        Ok(frame)
    }

    /// Flush and shut down the write half of the stream
    pub async fn shutdown(mut self) -> Result<()> {
        SinkExt::<Vec<u8>>::flush(&mut self.framed).await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}
