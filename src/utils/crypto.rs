//! AES-GCM and HMAC-SHA256 primitives used by the frame codec and handshake.
//!
//! Keys are held in [`CipherKey`], which fixes the AES variant by length
//! (16 bytes → AES-128-GCM, 32 bytes → AES-256-GCM) and wipes itself on drop.

use crate::error::{ProtocolError, Result};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce, Tag};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Length of the AES-GCM IV carried in every frame
pub const IV_LEN: usize = 12;

/// Length of the AES-GCM authentication tag
pub const TAG_LEN: usize = 16;

/// Length of an HMAC-SHA256 digest
pub const HMAC_LEN: usize = 32;

/// Symmetric key for frame encryption. The local key and the negotiated
/// session key are both represented this way.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub enum CipherKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl CipherKey {
    /// Build a key from raw bytes; only 16 and 32 byte keys are accepted.
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => {
                let mut k = [0u8; 16];
                k.copy_from_slice(key);
                Ok(CipherKey::Aes128(k))
            }
            32 => {
                let mut k = [0u8; 32];
                k.copy_from_slice(key);
                Ok(CipherKey::Aes256(k))
            }
            other => Err(ProtocolError::InvalidKeyLength(other)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CipherKey::Aes128(k) => k,
            CipherKey::Aes256(k) => k,
        }
    }

    /// Encrypt `plaintext`, returning the ciphertext and the detached tag.
    pub fn seal_detached(
        &self,
        iv: &[u8; IV_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
        let mut buffer = plaintext.to_vec();
        let nonce = Nonce::from_slice(iv);

        let tag = match self {
            CipherKey::Aes128(k) => Aes128Gcm::new_from_slice(k)
                .map_err(|_| ProtocolError::InvalidKeyLength(k.len()))?
                .encrypt_in_place_detached(nonce, aad, &mut buffer),
            CipherKey::Aes256(k) => Aes256Gcm::new_from_slice(k)
                .map_err(|_| ProtocolError::InvalidKeyLength(k.len()))?
                .encrypt_in_place_detached(nonce, aad, &mut buffer),
        }
        .map_err(|_| ProtocolError::EncryptionFailure)?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());
        Ok((buffer, tag_bytes))
    }

    /// Decrypt and authenticate. Any tag mismatch maps to
    /// `ProtocolError::AuthenticationFailed`.
    pub fn open_detached(
        &self,
        iv: &[u8; IV_LEN],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>> {
        let mut buffer = ciphertext.to_vec();
        let nonce = Nonce::from_slice(iv);
        let tag = Tag::from_slice(tag);

        match self {
            CipherKey::Aes128(k) => Aes128Gcm::new_from_slice(k)
                .map_err(|_| ProtocolError::InvalidKeyLength(k.len()))?
                .decrypt_in_place_detached(nonce, aad, &mut buffer, tag),
            CipherKey::Aes256(k) => Aes256Gcm::new_from_slice(k)
                .map_err(|_| ProtocolError::InvalidKeyLength(k.len()))?
                .decrypt_in_place_detached(nonce, aad, &mut buffer, tag),
        }
        .map_err(|_| {
            buffer.zeroize();
            ProtocolError::AuthenticationFailed
        })?;

        Ok(buffer)
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherKey::Aes128(_) => f.write_str("CipherKey::Aes128(<redacted>)"),
            CipherKey::Aes256(_) => f.write_str("CipherKey::Aes256(<redacted>)"),
        }
    }
}

/// Generate a fresh IV from the operating system CSPRNG
pub fn generate_iv() -> Result<[u8; IV_LEN]> {
    let mut iv = [0u8; IV_LEN];
    getrandom::fill(&mut iv).map_err(|e| ProtocolError::Custom(format!("OS RNG failure: {e}")))?;
    Ok(iv)
}

/// HMAC-SHA256 of `data` keyed with `key`
pub fn hmac_sha256(key: &CipherKey, data: &[u8]) -> Result<[u8; HMAC_LEN]> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    let mut out = [0u8; HMAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Constant-time check of an HMAC-SHA256 tag.
pub fn verify_hmac_sha256(
    key: &CipherKey,
    data: &[u8],
    tag: &[u8],
    reason: &'static str,
) -> Result<()> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    mac.verify_slice(tag)
        .map_err(|_| ProtocolError::HandshakeAuthFailed(reason))
}

fn new_mac(key: &CipherKey) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| ProtocolError::InvalidKeyLength(key.as_bytes().len()))
}

/// Derive the session key from the two handshake nonces.
///
/// `AES-GCM(local_key, iv = local_nonce[..12]).encrypt(local_nonce ^ remote_nonce)`
/// keeping the 16 ciphertext bytes and discarding the tag. This matches what
/// the lamp firmware computes, so it cannot be swapped for a standard KDF.
pub fn derive_session_key(
    local_key: &CipherKey,
    local_nonce: &[u8; 16],
    remote_nonce: &[u8; 16],
) -> Result<CipherKey> {
    let mut raw = [0u8; 16];
    for (out, (l, r)) in raw.iter_mut().zip(local_nonce.iter().zip(remote_nonce)) {
        *out = l ^ r;
    }

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&local_nonce[..IV_LEN]);

    let (mut ciphertext, _tag) = local_key.seal_detached(&iv, &[], &raw)?;
    raw.zeroize();

    let key = CipherKey::from_slice(&ciphertext);
    ciphertext.zeroize();
    key
}
