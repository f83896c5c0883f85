//! Timeout helpers for network operations.
//!
//! Every blocking step of a session (connect, send, receive) is bounded so a
//! silent device surfaces as `ProtocolError::Timeout` instead of hanging.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default bound on establishing the TCP connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on waiting for a device reply
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on flushing one frame to the socket
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(3);

/// Run `future`, mapping expiry to `ProtocolError::Timeout`
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future).await.map_err(|_| {
        debug!(timeout_ms = duration.as_millis() as u64, "Operation timed out");
        ProtocolError::Timeout
    })
}

/// Like [`with_timeout`] for futures that already return a protocol `Result`
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(future, duration).await?
}
