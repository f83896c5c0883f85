use crate::error::{constants, ProtocolError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, as used in the `t` field of control bodies
pub fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.into()))
}
