//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: AES-GCM frame sealing, HMAC-SHA256, session key derivation
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Per-session observability counters
//! - **Time**: Unix timestamps for control bodies
//! - **Timeout**: Async timeout wrappers
//!
//! ## Security
//! - IVs from the OS CSPRNG (getrandom)
//! - Constant-time HMAC verification
//! - Key material zeroized on drop (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;
