//! # neurolamp-protocol
//!
//! Encrypted local-network control protocol for smart lamps speaking the
//! "3.5" firmware framing over TCP.
//!
//! A session connects to the lamp, authenticates both sides with a
//! pre-shared local key, derives a per-connection AES-GCM session key and
//! then exchanges encrypted status queries and control commands.
//!
//! ## Layers
//! - [`core`]: 6699 frame layout, AES-GCM sealing, stream codec
//! - [`protocol`]: command codes, payloads, session key handshake
//! - [`transport`]: timeout-bounded framed TCP transport
//! - [`service`]: [`DeviceSession`] with open/get_status/set_status/close
//! - [`config`], [`error`], [`utils`]: configuration, error taxonomy,
//!   crypto, logging, metrics and timeouts
//!
//! ## Example
//! ```no_run
//! # async fn demo() -> neurolamp_protocol::Result<()> {
//! use neurolamp_protocol::{DeviceConfig, DeviceSession};
//!
//! let config = DeviceConfig::from_file("lamp.toml")?;
//! neurolamp_protocol::init_logging(&config.logging)?;
//!
//! let mut lamp = DeviceSession::open_with_config(&config).await?;
//! let status = lamp.get_status().await?;
//! println!("power: {}", status["dps"]["20"]);
//! lamp.set_status(20, false, true).await?;
//! lamp.close().await;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::{DeviceConfig, DEFAULT_PORT};
pub use error::{FramingError, ProtocolError, Result};
pub use protocol::command::CommandCode;
pub use protocol::message::LampMode;
pub use service::{DeviceSession, SessionOptions};
pub use utils::crypto::CipherKey;
pub use utils::logging::init_logging;
