//! Plaintext payloads carried inside encrypted frames.
//!
//! Control commands are JSON bodies behind a fixed version preamble:
//! ```text
//! "3.5" + NUL padding (16 bytes) ‖ {"protocol":5,"t":<unix-seconds>,"data":{"dps":{"<id>":<value>}}}
//! ```
//! Status queries are the bare JSON object `{}`.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::command::CommandCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Protocol version preamble in front of every control payload
pub const VERSION_HEADER: [u8; 16] = *b"3.5\0\0\0\0\0\0\0\0\0\0\0\0\0";

/// Bytes in front of the JSON body of a control reply (4 bytes of return
/// code and the 15 significant bytes of the version preamble)
pub const CONTROL_RESPONSE_PREFIX_LEN: usize = 19;

/// Value of the `protocol` field in control bodies
pub const CONTROL_PROTOCOL: u8 = 5;

/// Status query body
pub const STATUS_QUERY: &[u8] = b"{}";

/// Data point ids understood by the lamp firmware
pub mod dp {
    pub const POWER: u32 = 20;
    pub const MODE: u32 = 21;
    pub const COLOUR: u32 = 24;
    pub const SCENE: u32 = 25;
    pub const AUTO_OFF: u32 = 26;
    pub const DO_NOT_DISTURB: u32 = 34;
}

/// Longest accepted auto-off countdown (one day)
pub const MAX_AUTO_OFF_SECONDS: u32 = 86_400;

#[derive(Serialize)]
struct ControlBody<'a> {
    protocol: u8,
    t: u64,
    data: ControlData<'a>,
}

#[derive(Serialize)]
struct ControlData<'a> {
    dps: BTreeMap<String, &'a Value>,
}

/// A request the client can send once a session key exists
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StatusQuery,
    Control { dp_id: u32, value: Value },
}

impl Command {
    pub fn code(&self) -> CommandCode {
        match self {
            Command::StatusQuery => CommandCode::DpQueryNew,
            Command::Control { .. } => CommandCode::ControlNew,
        }
    }

    /// Serialize into the plaintext the firmware expects
    pub fn to_payload(&self, timestamp: u64) -> Result<Vec<u8>> {
        match self {
            Command::StatusQuery => Ok(build_status_query()),
            Command::Control { dp_id, value } => build_control_payload(*dp_id, value, timestamp),
        }
    }
}

pub fn build_status_query() -> Vec<u8> {
    STATUS_QUERY.to_vec()
}

/// Version preamble followed by the compact JSON control body
pub fn build_control_payload(dp_id: u32, value: &Value, timestamp: u64) -> Result<Vec<u8>> {
    let mut dps = BTreeMap::new();
    dps.insert(dp_id.to_string(), value);

    let body = ControlBody {
        protocol: CONTROL_PROTOCOL,
        t: timestamp,
        data: ControlData { dps },
    };

    let json = serde_json::to_vec(&body)
        .map_err(|e| ProtocolError::MalformedPayload(format!("control body: {e}")))?;

    let mut payload = Vec::with_capacity(VERSION_HEADER.len() + json.len());
    payload.extend_from_slice(&VERSION_HEADER);
    payload.extend_from_slice(&json);
    Ok(payload)
}

/// Strip trailing NUL padding and parse the status JSON
pub fn parse_status_payload(payload: &[u8]) -> Result<Value> {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);

    let text = std::str::from_utf8(&payload[..end])
        .map_err(|_| ProtocolError::MalformedPayload(constants::ERR_STATUS_NOT_UTF8.into()))?;

    serde_json::from_str(text).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

/// Body of a control reply, without the fixed 19-byte prefix.
/// Replies shorter than the prefix yield an empty slice.
pub fn strip_control_response(payload: &[u8]) -> &[u8] {
    payload.get(CONTROL_RESPONSE_PREFIX_LEN..).unwrap_or(&[])
}

/// Lamp working mode (dp 21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampMode {
    Colour,
    Music,
}

impl LampMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LampMode::Colour => "colour",
            LampMode::Music => "music",
        }
    }
}

impl fmt::Display for LampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LampMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "colour" => Ok(LampMode::Colour),
            "music" => Ok(LampMode::Music),
            other => Err(ProtocolError::InvalidArgument(format!(
                "mode must be 'colour' or 'music', got '{other}'"
            ))),
        }
    }
}

/// Colour codes are 12 hex digits: hue, saturation, value as 4 digits each
pub fn validate_colour_code(code: &str) -> Result<()> {
    if code.len() == 12 && code.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidArgument(format!(
            "colour code must be 12 hex digits (HHHHSSSSVVVV), got '{code}'"
        )))
    }
}

pub fn validate_auto_off(seconds: u32) -> Result<()> {
    if seconds <= MAX_AUTO_OFF_SECONDS {
        Ok(())
    } else {
        Err(ProtocolError::InvalidArgument(format!(
            "auto-off must be within 0..={MAX_AUTO_OFF_SECONDS} seconds, got {seconds}"
        )))
    }
}
