//! Session key negotiation with the lamp.
//!
//! The exchange authenticates both sides with the pre-shared local key and
//! derives a per-connection session key:
//!
//! ```text
//! client                                   device
//!   | SESS_KEY_NEG_START  (local_nonce)       |
//!   |---------------------------------------->|
//!   | SESS_KEY_NEG_RESP   (rsv, remote_nonce, |
//!   |   HMAC(local_key, local_nonce))         |
//!   |<----------------------------------------|
//!   | SESS_KEY_NEG_FINISH                     |
//!   |   (HMAC(local_key, remote_nonce))       |
//!   |---------------------------------------->|
//! session_key = AES-GCM(local_key, local_nonce[..12]).encrypt(local ^ remote)
//! ```
//!
//! All three frames are sealed with the local key. State lives in
//! per-run structures (`ClientHandshakeState`, `DeviceHandshakeState`) that
//! enforce step ordering; any failed step poisons the run.

use crate::core::frame::{self, DecodedMessage};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::command::CommandCode;
use crate::transport::tcp::FrameTransport;
use crate::utils::crypto::{derive_session_key, hmac_sha256, verify_hmac_sha256, CipherKey, HMAC_LEN};
use rand::CryptoRng;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, instrument, warn};
use zeroize::Zeroize;

/// Length of both handshake nonces
pub const NONCE_LEN: usize = 16;

/// Minimum size of the SESS_KEY_NEG_RESP payload
pub const RESPONSE_MIN_LEN: usize = 4 + NONCE_LEN + HMAC_LEN;

/// Where the client side of a handshake currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    AwaitingResponse,
    KeyConfirmed,
    Derived,
    Failed,
}

/// Steps named in `ProtocolError::HandshakeFailed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Start,
    VerifyResponse,
    Finish,
    DeriveKey,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandshakeStep::Start => "start",
            HandshakeStep::VerifyResponse => "response verification",
            HandshakeStep::Finish => "finish",
            HandshakeStep::DeriveKey => "key derivation",
        })
    }
}

fn random_nonce<R: CryptoRng + ?Sized>(rng: &mut R) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    nonce
}

fn expect_command(msg: &DecodedMessage, expected: CommandCode) -> Result<()> {
    if msg.cmd == expected.code() {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedCommand {
            expected: expected.code(),
            actual: msg.cmd,
        })
    }
}

/// Client-side handshake state - passed through the handshake flow
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct ClientHandshakeState {
    #[zeroize(skip)]
    state: HandshakeState,
    local_key: CipherKey,
    local_nonce: [u8; NONCE_LEN],
    remote_nonce: Option<[u8; NONCE_LEN]>,
}

impl ClientHandshakeState {
    /// New run with a nonce from the thread-local CSPRNG
    pub fn new(local_key: CipherKey) -> Self {
        Self::with_rng(local_key, &mut rand::rng())
    }

    /// New run drawing its nonce from `rng`
    pub fn with_rng<R: CryptoRng + ?Sized>(local_key: CipherKey, rng: &mut R) -> Self {
        Self::with_nonce(local_key, random_nonce(rng))
    }

    /// New run with a fixed nonce. Only for reproducing recorded exchanges.
    pub fn with_nonce(local_key: CipherKey, local_nonce: [u8; NONCE_LEN]) -> Self {
        Self {
            state: HandshakeState::Init,
            local_key,
            local_nonce,
            remote_nonce: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn local_nonce(&self) -> &[u8; NONCE_LEN] {
        &self.local_nonce
    }

    /// Key that seals the three handshake frames
    pub fn local_key(&self) -> &CipherKey {
        &self.local_key
    }

    fn transition(&mut self, from: HandshakeState, step: HandshakeStep) -> Result<()> {
        if self.state == from {
            Ok(())
        } else {
            self.state = HandshakeState::Failed;
            Err(ProtocolError::HandshakeOutOfOrder { attempted: step })
        }
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.state = HandshakeState::Failed;
        err
    }

    /// `Init → AwaitingResponse`: payload of the SESS_KEY_NEG_START frame
    pub fn start(&mut self) -> Result<Vec<u8>> {
        self.transition(HandshakeState::Init, HandshakeStep::Start)?;
        self.state = HandshakeState::AwaitingResponse;
        debug!("Client initiating session key negotiation");
        Ok(self.local_nonce.to_vec())
    }

    /// `AwaitingResponse → KeyConfirmed`: check the device proved it holds the local key
    pub fn verify_response(&mut self, response: &DecodedMessage) -> Result<()> {
        self.transition(HandshakeState::AwaitingResponse, HandshakeStep::VerifyResponse)?;

        if let Err(e) = expect_command(response, CommandCode::SessKeyNegResp) {
            return Err(self.fail(e));
        }

        let payload = &response.payload;
        if payload.len() < RESPONSE_MIN_LEN {
            return Err(self.fail(ProtocolError::MalformedPayload(format!(
                "{} (got {})",
                constants::ERR_RESPONSE_TOO_SHORT,
                payload.len()
            ))));
        }

        let mut remote_nonce = [0u8; NONCE_LEN];
        remote_nonce.copy_from_slice(&payload[4..4 + NONCE_LEN]);
        let received_tag = &payload[4 + NONCE_LEN..RESPONSE_MIN_LEN];

        if let Err(e) = verify_hmac_sha256(
            &self.local_key,
            &self.local_nonce,
            received_tag,
            constants::ERR_HMAC_MISMATCH,
        ) {
            warn!("Session key response carried an invalid HMAC");
            remote_nonce.zeroize();
            return Err(self.fail(e));
        }

        self.remote_nonce = Some(remote_nonce);
        self.state = HandshakeState::KeyConfirmed;
        debug!("Client verified device response");
        Ok(())
    }

    /// `KeyConfirmed → Derived`: returns the SESS_KEY_NEG_FINISH payload and
    /// the derived session key
    pub fn finish(&mut self) -> Result<(Vec<u8>, CipherKey)> {
        self.transition(HandshakeState::KeyConfirmed, HandshakeStep::Finish)?;

        let Some(remote_nonce) = self.remote_nonce else {
            return Err(self.fail(ProtocolError::HandshakeOutOfOrder {
                attempted: HandshakeStep::Finish,
            }));
        };

        let finish_tag = match hmac_sha256(&self.local_key, &remote_nonce) {
            Ok(tag) => tag,
            Err(e) => return Err(self.fail(e)),
        };
        let session_key = match derive_session_key(&self.local_key, &self.local_nonce, &remote_nonce)
        {
            Ok(key) => key,
            Err(e) => return Err(self.fail(e.in_step(HandshakeStep::DeriveKey))),
        };

        self.state = HandshakeState::Derived;
        debug!("Client derived session key");
        Ok((finish_tag.to_vec(), session_key))
    }
}

/// Device-side handshake state, used to emulate a lamp
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct DeviceHandshakeState {
    local_key: CipherKey,
    device_nonce: [u8; NONCE_LEN],
    client_nonce: Option<[u8; NONCE_LEN]>,
    #[zeroize(skip)]
    finished: bool,
}

impl DeviceHandshakeState {
    pub fn new(local_key: CipherKey) -> Self {
        Self::with_rng(local_key, &mut rand::rng())
    }

    pub fn with_rng<R: CryptoRng + ?Sized>(local_key: CipherKey, rng: &mut R) -> Self {
        Self::with_nonce(local_key, random_nonce(rng))
    }

    pub fn with_nonce(local_key: CipherKey, device_nonce: [u8; NONCE_LEN]) -> Self {
        Self {
            local_key,
            device_nonce,
            client_nonce: None,
            finished: false,
        }
    }

    pub fn local_key(&self) -> &CipherKey {
        &self.local_key
    }

    /// Answer SESS_KEY_NEG_START with the SESS_KEY_NEG_RESP payload
    pub fn respond(&mut self, start: &DecodedMessage) -> Result<Vec<u8>> {
        if self.client_nonce.is_some() {
            return Err(ProtocolError::HandshakeOutOfOrder {
                attempted: HandshakeStep::Start,
            });
        }
        expect_command(start, CommandCode::SessKeyNegStart)?;

        let client_nonce: [u8; NONCE_LEN] = start
            .payload
            .get(..NONCE_LEN)
            .and_then(|n| n.try_into().ok())
            .ok_or_else(|| {
                ProtocolError::MalformedPayload(format!(
                    "start payload must carry a {NONCE_LEN}-byte nonce, got {} bytes",
                    start.payload.len()
                ))
            })?;

        let tag = hmac_sha256(&self.local_key, &client_nonce)?;
        self.client_nonce = Some(client_nonce);

        let mut payload = Vec::with_capacity(RESPONSE_MIN_LEN);
        payload.extend_from_slice(&[0u8; 4]);
        payload.extend_from_slice(&self.device_nonce);
        payload.extend_from_slice(&tag);
        Ok(payload)
    }

    /// Verify SESS_KEY_NEG_FINISH and derive the same session key as the client
    pub fn finalize(&mut self, finish: &DecodedMessage) -> Result<CipherKey> {
        let client_nonce = match (self.client_nonce, self.finished) {
            (Some(nonce), false) => nonce,
            _ => {
                return Err(ProtocolError::HandshakeOutOfOrder {
                    attempted: HandshakeStep::Finish,
                })
            }
        };
        expect_command(finish, CommandCode::SessKeyNegFinish)?;
        verify_hmac_sha256(
            &self.local_key,
            &self.device_nonce,
            &finish.payload,
            constants::ERR_FINISH_MISMATCH,
        )?;

        self.finished = true;
        derive_session_key(&self.local_key, &client_nonce, &self.device_nonce)
    }
}

/// Increment the sequence counter and return the value for the next frame
pub(crate) fn next_seqno(seqno: &mut u32) -> u32 {
    *seqno = seqno.wrapping_add(1);
    *seqno
}

/// Run the client side of the handshake over `transport`.
///
/// `seqno` is advanced before each frame sent. Any failure is reported as
/// `ProtocolError::HandshakeFailed` naming the step; the run is not retried.
#[instrument(skip_all)]
pub async fn negotiate<T>(
    transport: &mut FrameTransport<T>,
    mut handshake: ClientHandshakeState,
    seqno: &mut u32,
) -> Result<CipherKey>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    // Step 1: SESS_KEY_NEG_START
    let start = handshake
        .start()
        .map_err(|e| e.in_step(HandshakeStep::Start))?;
    let frame = frame::encode(
        next_seqno(seqno),
        CommandCode::SessKeyNegStart.code(),
        &start,
        handshake.local_key(),
    )
    .map_err(|e| e.in_step(HandshakeStep::Start))?;
    transport
        .send_frame(frame)
        .await
        .map_err(|e| e.in_step(HandshakeStep::Start))?;

    // Step 2: SESS_KEY_NEG_RESP
    let raw = transport
        .recv_frame()
        .await
        .map_err(|e| e.in_step(HandshakeStep::VerifyResponse))?;
    let response = frame::decode(&raw, handshake.local_key())
        .map_err(|e| e.in_step(HandshakeStep::VerifyResponse))?;
    handshake
        .verify_response(&response)
        .map_err(|e| e.in_step(HandshakeStep::VerifyResponse))?;

    // Step 3: SESS_KEY_NEG_FINISH, then derive
    let (finish, session_key) = handshake
        .finish()
        .map_err(|e| e.in_step(HandshakeStep::Finish))?;
    let frame = frame::encode(
        next_seqno(seqno),
        CommandCode::SessKeyNegFinish.code(),
        &finish,
        handshake.local_key(),
    )
    .map_err(|e| e.in_step(HandshakeStep::Finish))?;
    transport
        .send_frame(frame)
        .await
        .map_err(|e| e.in_step(HandshakeStep::Finish))?;

    debug!(seqno = *seqno, "Session key negotiated");
    Ok(session_key)
}
