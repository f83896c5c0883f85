//! # Protocol Layer
//!
//! Command codes, plaintext payloads and the session key handshake.
//!
//! ## Components
//! - **Command**: command codes carried in the frame header
//! - **Message**: control and status payload builders and parsers
//! - **Handshake**: three-step session key negotiation (START, RESP, FINISH)
//!
//! ## Security
//! - Both sides prove possession of the local key with HMAC-SHA256
//! - Fresh random nonces per connection
//! - Step ordering enforced; a failed step poisons the run

pub mod command;
pub mod handshake;
pub mod message;

#[cfg(test)]
mod tests;
