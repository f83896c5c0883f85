//! # Transport Layer
//!
//! Byte-stream transport for encrypted frames.
//!
//! The lamp only speaks plain TCP on its local port; [`tcp::FrameTransport`]
//! is generic over the stream so the same code runs over in-memory pipes.

pub mod tcp;
