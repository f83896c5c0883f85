//! # Core Protocol Components
//!
//! Low-level frame handling: the encrypted 6699 frame and the stream codec
//! that cuts a TCP byte stream into frames.
//!
//! ## Components
//! - **Frame**: header layout, AES-GCM sealing/opening, framing validation
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Prefix(4)] [Reserved(4)] [Seqno(4)] [Cmd(4)] [Length(4)] [IV(12)] [Ciphertext(N)] [Tag(16)] [Suffix(4)]
//! ```
//!
//! ## Security
//! - Length validation before allocation (see `config::MAX_FRAME_LENGTH`)
//! - Prefix and suffix checked before any decryption
//! - Header bytes authenticated as AES-GCM associated data

pub mod codec;
pub mod frame;
