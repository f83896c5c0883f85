//! Tokio codec that splits a TCP byte stream into whole 6699 frames.
//!
//! The decoder only looks at the clear-text header: it checks the prefix as
//! soon as four bytes are available and uses the `length` field to know how
//! many bytes belong to the frame. Suffix checks and decryption happen later
//! in [`crate::core::frame::decode`].

use crate::config::MAX_FRAME_LENGTH;
use crate::core::frame::{
    FrameHeader, HEADER_LEN, LENGTH_OVERHEAD, MIN_FRAME_LEN, PREFIX_BYTES, SUFFIX_LEN,
};
use crate::error::{FramingError, ProtocolError};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_length: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_length: MAX_FRAME_LENGTH,
        }
    }

    /// Codec that refuses frames whose length field exceeds `max_length`
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Fail fast on garbage instead of waiting for a full header
        let visible = src.len().min(PREFIX_BYTES.len());
        if src[..visible] != PREFIX_BYTES[..visible] {
            let mut prefix = [0u8; 4];
            prefix[..visible].copy_from_slice(&src[..visible]);
            warn!(prefix = ?prefix, "Dropping stream with invalid frame prefix");
            return Err(FramingError::BadPrefix(u32::from_be_bytes(prefix)).into());
        }

        if src.len() < HEADER_LEN {
            src.reserve(MIN_FRAME_LEN - src.len());
            return Ok(None);
        }

        let header = FrameHeader::parse(&src[..HEADER_LEN])?;
        let length = header.length as usize;

        if length > self.max_length {
            return Err(FramingError::OversizedFrame(length).into());
        }
        if length < LENGTH_OVERHEAD {
            return Err(FramingError::ShortFrame {
                expected: MIN_FRAME_LEN,
                actual: HEADER_LEN + length + SUFFIX_LEN,
            }
            .into());
        }

        let total = header.frame_len();
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(total)))
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(frame.len());
        dst.put_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::frame::{decode, encode};
    use crate::utils::crypto::CipherKey;

    fn key() -> CipherKey {
        CipherKey::from_slice(b"0123456789abcdef").unwrap()
    }

    #[test]
    fn waits_for_complete_frame() {
        let frame = encode(2, 16, b"{\"1\":true}", &key()).unwrap();
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        for (i, byte) in frame.iter().enumerate() {
            buf.put_u8(*byte);
            let out = codec.decode(&mut buf).unwrap();
            if i + 1 < frame.len() {
                assert!(out.is_none(), "frame yielded early at byte {i}");
            } else {
                let whole = out.unwrap();
                assert_eq!(&whole[..], &frame[..]);
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn splits_back_to_back_frames() {
        let first = encode(2, 16, b"{}", &key()).unwrap();
        let second = encode(3, 13, b"second", &key()).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        let mut codec = FrameCodec::new();
        let a = codec.decode(&mut buf).unwrap().unwrap();
        let b = codec.decode(&mut buf).unwrap().unwrap();
        assert!(codec.decode(&mut buf).unwrap().is_none());

        assert_eq!(decode(&a, &key()).unwrap().seqno, 2);
        assert_eq!(decode(&b, &key()).unwrap().payload, b"second");
    }

    #[test]
    fn rejects_garbage_prefix_early() {
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x55][..]);
        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing(FramingError::BadPrefix(_))
        ));
    }

    #[test]
    fn rejects_oversized_length() {
        let mut header = FrameHeader::for_payload(1, 16, 0).unwrap();
        header.length = 4096;
        let mut buf = BytesMut::from(&header.to_bytes()[..]);

        let err = FrameCodec::with_max_length(1024).decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing(FramingError::OversizedFrame(4096))
        ));
    }

    #[test]
    fn encoder_passes_frames_through() {
        let frame = encode(4, 13, b"x", &key()).unwrap();
        let mut dst = BytesMut::new();
        FrameCodec::new().encode(frame.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &frame[..]);
    }
}
