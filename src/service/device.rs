//! Encrypted session with a single lamp.
//!
//! A [`DeviceSession`] owns the framed transport, the frame sequence counter,
//! the negotiated session key and its own metrics. Every operation takes
//! `&mut self`, so one session serves one request at a time; share it across
//! tasks behind a `tokio::sync::Mutex` if needed.
//!
//! ```no_run
//! # async fn demo() -> neurolamp_protocol::error::Result<()> {
//! use neurolamp_protocol::service::DeviceSession;
//!
//! let mut lamp = DeviceSession::open(b"0123456789abcdef", "192.168.1.100", 6668).await?;
//! println!("{}", lamp.get_status().await?);
//! lamp.set_power(true, true).await?;
//! lamp.close().await;
//! # Ok(())
//! # }
//! ```

use crate::config::{DeviceConfig, MAX_FRAME_LENGTH};
use crate::core::codec::FrameCodec;
use crate::core::frame::{self, DecodedMessage};
use crate::error::{ProtocolError, Result};
use crate::protocol::command::CommandCode;
use crate::protocol::handshake::{self, negotiate, ClientHandshakeState};
use crate::protocol::message::{
    build_control_payload, build_status_query, dp, parse_status_payload, strip_control_response,
    validate_auto_off, validate_colour_code, LampMode,
};
use crate::transport::tcp::{self, FrameTransport};
use crate::utils::crypto::CipherKey;
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::time::unix_timestamp;
use crate::utils::timeout::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

/// Per-session transport settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub send_timeout: Duration,
    pub response_timeout: Duration,
    pub max_frame_length: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

impl From<&DeviceConfig> for SessionOptions {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            send_timeout: config.client.send_timeout,
            response_timeout: config.client.response_timeout,
            max_frame_length: config.transport.max_frame_length,
        }
    }
}

pub struct DeviceSession<T = TcpStream> {
    transport: Option<FrameTransport<T>>,
    session_key: Option<CipherKey>,
    seqno: u32,
    /// Controls sent without waiting whose acknowledgement is still unread
    pending_acks: usize,
    metrics: Arc<Metrics>,
}

impl DeviceSession<TcpStream> {
    /// Connect to a lamp and negotiate a session key
    pub async fn open(local_key: &[u8], address: &str, port: u16) -> Result<Self> {
        let key = CipherKey::from_slice(local_key)?;
        let stream = tcp::connect(address, port, DEFAULT_CONNECT_TIMEOUT).await?;
        Self::establish(stream, key, SessionOptions::default()).await
    }

    /// Validate `config`, connect to the lamp it names and negotiate a session key
    pub async fn open_with_config(config: &DeviceConfig) -> Result<Self> {
        config.validate_strict()?;
        let key = config.client.local_key()?;
        let stream = tcp::connect(
            &config.client.address,
            config.client.port,
            config.client.connection_timeout,
        )
        .await?;
        Self::establish(stream, key, SessionOptions::from(config)).await
    }
}

impl<T> DeviceSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Negotiate a session key over an already connected stream
    pub async fn establish(stream: T, local_key: CipherKey, options: SessionOptions) -> Result<Self> {
        Self::establish_with(stream, ClientHandshakeState::new(local_key), options).await
    }

    /// Like [`establish`](Self::establish) with a prepared handshake, e.g. one
    /// whose nonce comes from a seeded RNG
    #[instrument(skip_all)]
    pub async fn establish_with(
        stream: T,
        handshake: ClientHandshakeState,
        options: SessionOptions,
    ) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let codec = FrameCodec::with_max_length(options.max_frame_length);
        let mut transport = FrameTransport::new(stream, codec)
            .with_timeouts(options.send_timeout, options.response_timeout)
            .with_metrics(Arc::clone(&metrics));

        let mut seqno = 1;
        metrics.handshake_attempt();
        let _timer = Timer::start("handshake");

        match negotiate(&mut transport, handshake, &mut seqno).await {
            Ok(session_key) => {
                metrics.handshake_success();
                info!("Session established");
                Ok(Self {
                    transport: Some(transport),
                    session_key: Some(session_key),
                    seqno,
                    pending_acks: 0,
                    metrics,
                })
            }
            Err(e) => {
                metrics.handshake_failed();
                metrics.record_error(&e);
                warn!(error = %e, "Session key negotiation failed");
                // transport is dropped here, releasing the stream
                Err(e)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some() && self.session_key.is_some()
    }

    /// Sequence number of the last frame sent
    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn parts(&mut self) -> Result<(&mut FrameTransport<T>, &CipherKey)> {
        match (self.transport.as_mut(), self.session_key.as_ref()) {
            (Some(transport), Some(key)) => Ok((transport, key)),
            _ => Err(ProtocolError::NotConnected),
        }
    }

    async fn send_command(&mut self, cmd: CommandCode, payload: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        let seqno = handshake::next_seqno(&mut self.seqno);
        let (transport, key) = self.parts()?;
        let frame = frame::encode(seqno, cmd.code(), payload, key)?;
        debug!(%cmd, seqno, "Sending command");
        transport.send_frame(frame).await
    }

    async fn recv_reply(&mut self) -> Result<DecodedMessage> {
        let (transport, key) = self.parts()?;
        let raw = transport.recv_frame().await?;
        frame::decode(&raw, key)
    }

    /// Number of acknowledgements owed by the lamp for controls sent without waiting
    pub fn pending_acks(&self) -> usize {
        self.pending_acks
    }

    /// Read and discard the acknowledgements of earlier no-wait controls so
    /// the next reply read belongs to the next request. Each read is bounded
    /// by the response timeout; an acknowledgement that never arrives is
    /// written off.
    async fn drain_pending_acks(&mut self) -> Result<()> {
        while self.pending_acks > 0 {
            let (transport, key) = self.parts()?;
            match transport.recv_frame().await {
                Ok(raw) => {
                    let stale = frame::decode(&raw, key);
                    self.pending_acks -= 1;
                    let stale = stale?;
                    debug!(cmd = stale.cmd, "Discarded acknowledgement of no-wait control");
                }
                Err(ProtocolError::Timeout) => {
                    warn!(
                        missing = self.pending_acks,
                        "Lamp did not acknowledge earlier controls"
                    );
                    self.pending_acks = 0;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn observe<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            self.metrics.record_error(e);
            warn!(error = %e, "Lamp request failed");
            if matches!(e, ProtocolError::Timeout) {
                // A late reply would be read as the answer to the next request
                self.transport = None;
                self.session_key = None;
                self.pending_acks = 0;
                warn!("Session closed after timeout");
            }
        }
        result
    }

    async fn query_status(&mut self) -> Result<Value> {
        self.drain_pending_acks().await?;
        self.send_command(CommandCode::DpQueryNew, &build_status_query())
            .await?;
        let reply = self.recv_reply().await?;
        if reply.cmd != CommandCode::DpQueryNew.code() {
            return Err(ProtocolError::UnexpectedCommand {
                expected: CommandCode::DpQueryNew.code(),
                actual: reply.cmd,
            });
        }
        parse_status_payload(&reply.payload)
    }

    async fn send_control(
        &mut self,
        dp_id: u32,
        value: &Value,
        wait: bool,
    ) -> Result<Option<Vec<u8>>> {
        let payload = build_control_payload(dp_id, value, unix_timestamp()?)?;
        if wait {
            self.drain_pending_acks().await?;
        }
        self.send_command(CommandCode::ControlNew, &payload).await?;
        if !wait {
            self.pending_acks += 1;
            return Ok(None);
        }
        let reply = self.recv_reply().await?;
        Ok(Some(strip_control_response(&reply.payload).to_vec()))
    }

    /// Query all data points
    #[instrument(skip(self))]
    pub async fn get_status(&mut self) -> Result<Value> {
        let result = self.query_status().await;
        self.observe(result)
    }

    /// Set one data point. With `wait`, returns the reply body after the
    /// fixed control-response prefix; otherwise returns `None` once the
    /// frame is written.
    #[instrument(skip(self, value))]
    pub async fn set_status(
        &mut self,
        dp_id: u32,
        value: impl Into<Value>,
        wait: bool,
    ) -> Result<Option<Vec<u8>>> {
        let value = value.into();
        let result = self.send_control(dp_id, &value, wait).await;
        self.observe(result)
    }

    pub async fn set_power(&mut self, on: bool, wait: bool) -> Result<Option<Vec<u8>>> {
        self.set_status(dp::POWER, on, wait).await
    }

    pub async fn set_mode(&mut self, mode: LampMode, wait: bool) -> Result<Option<Vec<u8>>> {
        self.set_status(dp::MODE, mode.as_str(), wait).await
    }

    /// Set the colour from a 12-hex-digit `HHHHSSSSVVVV` code
    pub async fn set_color(&mut self, code: &str, wait: bool) -> Result<Option<Vec<u8>>> {
        validate_colour_code(code)?;
        self.set_status(dp::COLOUR, code.to_ascii_lowercase(), wait)
            .await
    }

    pub async fn set_scene(&mut self, scene: &str, wait: bool) -> Result<Option<Vec<u8>>> {
        if scene.is_empty() {
            return Err(ProtocolError::InvalidArgument(
                "scene data cannot be empty".into(),
            ));
        }
        self.set_status(dp::SCENE, scene, wait).await
    }

    /// Switch off after `seconds` (0 cancels the countdown)
    pub async fn set_auto_off(&mut self, seconds: u32, wait: bool) -> Result<Option<Vec<u8>>> {
        validate_auto_off(seconds)?;
        self.set_status(dp::AUTO_OFF, seconds, wait).await
    }

    pub async fn set_do_not_disturb(&mut self, enabled: bool, wait: bool) -> Result<Option<Vec<u8>>> {
        self.set_status(dp::DO_NOT_DISTURB, enabled, wait).await
    }

    /// Release the transport and forget the session key. Safe to call twice.
    pub async fn close(&mut self) {
        self.session_key = None;
        self.pending_acks = 0;
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.shutdown().await {
                debug!(error = %e, "Ignoring error while shutting down transport");
            }
            self.metrics.log_metrics();
            info!("Session closed");
        }
    }
}
