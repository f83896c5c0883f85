//! In-process lamp emulator driven over any async byte stream.

#![allow(dead_code, clippy::unwrap_used)]

use bytes::BytesMut;
use neurolamp_protocol::core::codec::FrameCodec;
use neurolamp_protocol::core::frame::{decode, encode, DecodedMessage};
use neurolamp_protocol::protocol::command::CommandCode;
use neurolamp_protocol::protocol::handshake::DeviceHandshakeState;
use neurolamp_protocol::transport::tcp::FrameTransport;
use neurolamp_protocol::{CipherKey, ProtocolError, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

pub const LOCAL_KEY: &[u8; 16] = b"0123456789abcdef";

/// Data points the emulated lamp reports, followed by NUL padding
pub const STATUS_JSON: &[u8] = br#"{"dps":{"20":true,"21":"colour","24":"000003e803e8","26":0}}"#;

pub fn local_key() -> CipherKey {
    CipherKey::from_slice(LOCAL_KEY).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Follows the protocol
    Normal,
    /// Corrupts the HMAC in SESS_KEY_NEG_RESP
    ForgedHmac,
    /// Answers START with bytes that are not a frame
    GarbageResponse,
    /// Completes the handshake, then never answers
    Silent,
    /// Answers status queries with a CONTROL_NEW frame
    WrongStatusCommand,
}

async fn next_frame<T>(transport: &mut FrameTransport<T>) -> Result<Option<BytesMut>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match transport.recv_frame().await {
        Ok(raw) => Ok(Some(raw)),
        Err(ProtocolError::ConnectionClosed) => Ok(None),
        Err(e) => Err(e),
    }
}

fn control_reply(request: &DecodedMessage) -> Result<Vec<u8>> {
    let body: Value = serde_json::from_slice(&request.payload[16..])
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;

    let mut reply = vec![0u8; 4];
    reply.extend_from_slice(b"3.5");
    reply.extend_from_slice(&[0u8; 12]);
    reply.extend_from_slice(
        &serde_json::to_vec(&json!({ "dps": body["data"]["dps"] }))
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?,
    );
    Ok(reply)
}

/// Serve one client connection. Returns every frame the lamp decoded, the
/// handshake frames included, once the client hangs up.
pub async fn run_lamp<T>(stream: T, behaviour: Behaviour) -> Result<Vec<DecodedMessage>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let key = local_key();
    let mut transport = FrameTransport::new(stream, FrameCodec::new())
        .with_timeouts(Duration::from_secs(60), Duration::from_secs(3600));
    let mut device = DeviceHandshakeState::new(key.clone());
    let mut seen = Vec::new();
    let mut seqno = 0u32;

    let Some(raw) = next_frame(&mut transport).await? else {
        return Ok(seen);
    };
    let start = decode(&raw, &key)?;
    seen.push(start.clone());

    if behaviour == Behaviour::GarbageResponse {
        transport
            .send_frame(b"\xde\xad\xbe\xef not a frame".to_vec())
            .await?;
        while next_frame(&mut transport).await?.is_some() {}
        return Ok(seen);
    }

    let mut resp = device.respond(&start)?;
    if behaviour == Behaviour::ForgedHmac {
        resp[51] ^= 0x01;
    }
    seqno += 1;
    transport
        .send_frame(encode(seqno, CommandCode::SessKeyNegResp.code(), &resp, &key)?)
        .await?;

    let Some(raw) = next_frame(&mut transport).await? else {
        return Ok(seen);
    };
    let finish = decode(&raw, &key)?;
    seen.push(finish.clone());
    let session_key = device.finalize(&finish)?;

    while let Some(raw) = next_frame(&mut transport).await? {
        let request = decode(&raw, &session_key)?;
        seen.push(request.clone());
        if behaviour == Behaviour::Silent {
            continue;
        }

        let (cmd, payload) = match CommandCode::from_code(request.cmd) {
            Some(CommandCode::DpQueryNew) => {
                let mut payload = STATUS_JSON.to_vec();
                payload.extend_from_slice(&[0u8; 8]);
                let cmd = if behaviour == Behaviour::WrongStatusCommand {
                    CommandCode::ControlNew
                } else {
                    CommandCode::DpQueryNew
                };
                (cmd, payload)
            }
            Some(CommandCode::ControlNew) => (CommandCode::ControlNew, control_reply(&request)?),
            _ => continue,
        };

        seqno += 1;
        match transport
            .send_frame(encode(seqno, cmd.code(), &payload, &session_key)?)
            .await
        {
            Ok(()) => {}
            // The client hung up without reading this reply
            Err(ProtocolError::Io(_) | ProtocolError::ConnectionClosed) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(seen)
}
