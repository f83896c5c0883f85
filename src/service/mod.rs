//! # Service Layer
//!
//! High-level session API: connect, negotiate a session key, then query and
//! control the lamp over the encrypted channel.

pub mod device;

pub use device::{DeviceSession, SessionOptions};
