//! # Frame Codec
//!
//! Encodes and decodes the encrypted 6699 frame exchanged with the lamp.
//!
//! ## Wire Format
//! ```text
//! offset  size  field
//! 0       4     prefix = 0x00006699
//! 4       4     reserved
//! 8       4     seqno
//! 12      4     cmd
//! 16      4     length   (= N + 28)
//! 20      12    iv
//! 32      N     ciphertext
//! 32+N    16    tag
//! 48+N    4     suffix = 0x00009966
//! ```
//!
//! The 16 header bytes after the prefix are the AES-GCM associated data, so
//! any change to seqno, cmd or length is caught by the tag check.
//!
//! Framing is validated in full by [`RawFrame::parse`] before the cipher is
//! ever touched; only a structurally sound frame reaches decryption.

use crate::error::{FramingError, ProtocolError, Result};
use crate::utils::crypto::{generate_iv, CipherKey, IV_LEN, TAG_LEN};

/// Leading magic value of every frame
pub const PREFIX: u32 = 0x0000_6699;

/// Trailing magic value of every frame
pub const SUFFIX: u32 = 0x0000_9966;

pub const PREFIX_BYTES: [u8; 4] = PREFIX.to_be_bytes();
pub const SUFFIX_BYTES: [u8; 4] = SUFFIX.to_be_bytes();

/// prefix + reserved + seqno + cmd + length
pub const HEADER_LEN: usize = 20;

pub const SUFFIX_LEN: usize = 4;

/// Bytes counted by the length field on top of the ciphertext (IV + tag)
pub const LENGTH_OVERHEAD: usize = IV_LEN + TAG_LEN;

/// Smallest possible frame: empty ciphertext
pub const MIN_FRAME_LEN: usize = HEADER_LEN + LENGTH_OVERHEAD + SUFFIX_LEN;

/// Parsed frame header (prefix already verified)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub reserved: u32,
    pub seqno: u32,
    pub cmd: u32,
    pub length: u32,
}

impl FrameHeader {
    /// Header for a payload of `payload_len` plaintext bytes
    pub fn for_payload(seqno: u32, cmd: u32, payload_len: usize) -> Result<Self> {
        let length = payload_len
            .checked_add(LENGTH_OVERHEAD)
            .and_then(|l| u32::try_from(l).ok())
            .ok_or(FramingError::OversizedFrame(payload_len))?;

        Ok(Self {
            reserved: 0,
            seqno,
            cmd,
            length,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&PREFIX_BYTES);
        out[4..8].copy_from_slice(&self.reserved.to_be_bytes());
        out[8..12].copy_from_slice(&self.seqno.to_be_bytes());
        out[12..16].copy_from_slice(&self.cmd.to_be_bytes());
        out[16..20].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Parse the fixed header, checking the prefix.
    pub fn parse(data: &[u8]) -> std::result::Result<Self, FramingError> {
        if data.len() < HEADER_LEN {
            return Err(FramingError::ShortFrame {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }

        let prefix = read_u32(data, 0);
        if prefix != PREFIX {
            return Err(FramingError::BadPrefix(prefix));
        }

        Ok(Self {
            reserved: read_u32(data, 4),
            seqno: read_u32(data, 8),
            cmd: read_u32(data, 12),
            length: read_u32(data, 16),
        })
    }

    /// Total on-wire size of the frame described by this header
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.length as usize + SUFFIX_LEN
    }
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(buf)
}

/// The AEAD operations a frame needs. [`CipherKey`] is the production
/// implementation; the trait lets callers observe or substitute decryption.
pub trait FrameCipher {
    fn seal(
        &self,
        iv: &[u8; IV_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN])>;

    fn open(
        &self,
        iv: &[u8; IV_LEN],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>>;
}

impl FrameCipher for CipherKey {
    fn seal(
        &self,
        iv: &[u8; IV_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
        self.seal_detached(iv, aad, plaintext)
    }

    fn open(
        &self,
        iv: &[u8; IV_LEN],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>> {
        self.open_detached(iv, aad, ciphertext, tag)
    }
}

/// A structurally valid frame that has not been decrypted yet.
#[derive(Debug, Clone)]
pub struct RawFrame<'a> {
    pub header: FrameHeader,
    pub iv: [u8; IV_LEN],
    pub ciphertext: &'a [u8],
    pub tag: [u8; TAG_LEN],
    aad: &'a [u8],
}

impl<'a> RawFrame<'a> {
    /// Check prefix, length and suffix and slice the frame into its parts.
    /// Bytes after the suffix are ignored.
    pub fn parse(data: &'a [u8]) -> std::result::Result<Self, FramingError> {
        let header = FrameHeader::parse(data)?;
        let length = header.length as usize;

        if length < LENGTH_OVERHEAD {
            return Err(FramingError::ShortFrame {
                expected: MIN_FRAME_LEN,
                actual: HEADER_LEN + length + SUFFIX_LEN,
            });
        }

        let iv_end = HEADER_LEN + IV_LEN;
        let tag_start = HEADER_LEN + length - TAG_LEN;
        let suffix_start = tag_start + TAG_LEN;
        let frame_end = suffix_start + SUFFIX_LEN;

        if data.len() < frame_end {
            return Err(FramingError::ShortFrame {
                expected: frame_end,
                actual: data.len(),
            });
        }

        let mut suffix = [0u8; SUFFIX_LEN];
        suffix.copy_from_slice(&data[suffix_start..frame_end]);
        if suffix != SUFFIX_BYTES {
            return Err(FramingError::BadSuffix(suffix));
        }

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&data[HEADER_LEN..iv_end]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&data[tag_start..suffix_start]);

        Ok(Self {
            header,
            iv,
            ciphertext: &data[iv_end..tag_start],
            tag,
            aad: &data[4..HEADER_LEN],
        })
    }

    /// Header bytes authenticated by the tag (everything after the prefix)
    pub fn aad(&self) -> &'a [u8] {
        self.aad
    }

    /// Decrypt and authenticate the frame.
    pub fn open<C: FrameCipher + ?Sized>(&self, cipher: &C) -> Result<DecodedMessage> {
        let payload = cipher.open(&self.iv, self.aad, self.ciphertext, &self.tag)?;
        Ok(DecodedMessage {
            seqno: self.header.seqno,
            cmd: self.header.cmd,
            payload,
        })
    }
}

/// A decrypted frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub seqno: u32,
    pub cmd: u32,
    pub payload: Vec<u8>,
}

/// Encrypt `payload` into a complete frame using a fresh random IV.
pub fn encode(seqno: u32, cmd: u32, payload: &[u8], key: &CipherKey) -> Result<Vec<u8>> {
    let iv = generate_iv()?;
    encode_with_iv(seqno, cmd, payload, &iv, key)
}

/// Encrypt `payload` into a complete frame with a caller-chosen IV.
///
/// Reusing an IV under the same key breaks AES-GCM; this exists for
/// reproducible vectors and device emulation.
pub fn encode_with_iv<C: FrameCipher + ?Sized>(
    seqno: u32,
    cmd: u32,
    payload: &[u8],
    iv: &[u8; IV_LEN],
    cipher: &C,
) -> Result<Vec<u8>> {
    let header = FrameHeader::for_payload(seqno, cmd, payload.len())?;
    let header_bytes = header.to_bytes();

    let (ciphertext, tag) = cipher.seal(iv, &header_bytes[4..], payload)?;

    let mut out = Vec::with_capacity(header.frame_len());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&SUFFIX_BYTES);
    Ok(out)
}

/// Validate and decrypt a frame.
pub fn decode(data: &[u8], key: &CipherKey) -> Result<DecodedMessage> {
    decode_with(data, key)
}

/// [`decode`] against any [`FrameCipher`]. Framing errors are returned
/// without calling the cipher.
pub fn decode_with<C: FrameCipher + ?Sized>(data: &[u8], cipher: &C) -> Result<DecodedMessage> {
    let frame = RawFrame::parse(data).map_err(ProtocolError::Framing)?;
    frame.open(cipher)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const KEY: &[u8; 16] = b"0123456789abcdef";

    fn key() -> CipherKey {
        CipherKey::from_slice(KEY).unwrap()
    }

    /// Wraps a real key and counts decryption attempts
    struct CountingCipher {
        inner: CipherKey,
        opens: Cell<usize>,
    }

    impl FrameCipher for CountingCipher {
        fn seal(
            &self,
            iv: &[u8; IV_LEN],
            aad: &[u8],
            plaintext: &[u8],
        ) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
            self.inner.seal(iv, aad, plaintext)
        }

        fn open(
            &self,
            iv: &[u8; IV_LEN],
            aad: &[u8],
            ciphertext: &[u8],
            tag: &[u8; TAG_LEN],
        ) -> Result<Vec<u8>> {
            self.opens.set(self.opens.get() + 1);
            self.inner.open(iv, aad, ciphertext, tag)
        }
    }

    #[test]
    fn length_field_counts_iv_and_tag() {
        let payload = br#"{"test":1}"#;
        let frame = encode(2, 13, payload, &key()).unwrap();

        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.length as usize, payload.len() + 28);
        assert_eq!(frame.len(), HEADER_LEN + payload.len() + 28 + SUFFIX_LEN);
        assert_eq!(&frame[..4], &PREFIX_BYTES);
        assert_eq!(&frame[frame.len() - 4..], &SUFFIX_BYTES);

        let decoded = decode(&frame, &key()).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.cmd, 13);
        assert_eq!(decoded.seqno, 2);
    }

    #[test]
    fn matches_recorded_frame() {
        let iv = [0x11u8; IV_LEN];
        let frame = encode_with_iv(2, 13, br#"{"test":1}"#, &iv, &key()).unwrap();
        assert_eq!(
            hex::encode(&frame),
            "0000669900000000000000020000000d00000026111111111111111111111111\
             b53fb731cb13a3c04ad525b51927732166c9202674f6bd57060f00009966"
        );
    }

    #[test]
    fn header_fields_are_authenticated() {
        let mut frame = encode(5, 16, b"{}", &key()).unwrap();
        // Rewrite the cmd field
        frame[15] = 13;
        assert!(matches!(
            decode(&frame, &key()),
            Err(ProtocolError::AuthenticationFailed)
        ));
    }

    #[test]
    fn bad_prefix_is_rejected_before_decryption() {
        let cipher = CountingCipher {
            inner: key(),
            opens: Cell::new(0),
        };
        let mut frame = encode(2, 13, b"payload", &key()).unwrap();
        frame[2] ^= 0xFF;

        let err = decode_with(&frame, &cipher).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing(FramingError::BadPrefix(_))
        ));
        assert_eq!(cipher.opens.get(), 0);
    }

    #[test]
    fn bad_suffix_is_rejected_before_decryption() {
        let cipher = CountingCipher {
            inner: key(),
            opens: Cell::new(0),
        };
        let mut frame = encode(2, 13, b"payload", &key()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        let err = decode_with(&frame, &cipher).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing(FramingError::BadSuffix(_))
        ));
        assert_eq!(cipher.opens.get(), 0);

        // A valid frame does reach the cipher exactly once
        let good = encode(3, 13, b"payload", &key()).unwrap();
        decode_with(&good, &cipher).unwrap();
        assert_eq!(cipher.opens.get(), 1);
    }

    #[test]
    fn truncated_frame_is_short_not_auth_failure() {
        let frame = encode(2, 13, b"some payload", &key()).unwrap();
        for cut in [0, 3, HEADER_LEN - 1, HEADER_LEN, frame.len() - 1] {
            match decode(&frame[..cut], &key()) {
                Err(ProtocolError::Framing(FramingError::ShortFrame { actual, .. })) => {
                    assert_eq!(actual, cut)
                }
                other => panic!("cut at {cut}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn length_below_overhead_is_short_frame() {
        let mut frame = encode(2, 13, b"", &key()).unwrap();
        frame[16..20].copy_from_slice(&10u32.to_be_bytes());
        assert!(matches!(
            decode(&frame, &key()),
            Err(ProtocolError::Framing(FramingError::ShortFrame { .. }))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let frame = encode(2, 13, b"tamper me", &key()).unwrap();
        let mut tampered = frame.clone();
        tampered[HEADER_LEN + IV_LEN] ^= 0x80;
        assert!(matches!(
            decode(&tampered, &key()),
            Err(ProtocolError::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let frame = encode(2, 13, b"secret", &key()).unwrap();
        let other = CipherKey::from_slice(b"fedcba9876543210").unwrap();
        assert!(matches!(
            decode(&frame, &other),
            Err(ProtocolError::AuthenticationFailed)
        ));
    }

    #[test]
    fn empty_payload_roundtrip() {
        let frame = encode(1, 16, b"", &key()).unwrap();
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        assert_eq!(decode(&frame, &key()).unwrap().payload, Vec::<u8>::new());
    }

    #[test]
    fn trailing_bytes_after_suffix_are_ignored() {
        let mut frame = encode(9, 16, b"{}", &key()).unwrap();
        frame.extend_from_slice(&[0xAA; 7]);
        assert_eq!(decode(&frame, &key()).unwrap().payload, b"{}");
    }
}
