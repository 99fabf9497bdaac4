//! Authenticated encryption of command payloads
//!
//! Payload layout: `IV[16] || ciphertext[N] || tag[16]`. The 16-byte IV is fed
//! to AES-GCM as a full-length nonce (GHASH-derived counter block), which keeps
//! the layout byte-compatible with encoders that use 16-byte GCM nonces.
//!
//! Obfuscated layout: `pad_len[1] || pad[pad_len] || payload`.

use crate::error::{Result, StegoError};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Nonce};
use aes_gcm::aes::{Aes128, Aes192, Aes256};
use aes_gcm::AesGcm;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

/// Smallest well-formed encrypted payload (empty plaintext).
pub const MIN_PAYLOAD_LEN: usize = IV_LEN + TAG_LEN;

/// Random padding added by `add_obfuscation` is 1..=32 bytes.
pub const MAX_RANDOM_PADDING: u8 = 32;

type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes192Gcm16 = AesGcm<Aes192, U16>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// AES key material (16, 24 or 32 bytes). Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes.to_vec())),
            other => Err(StegoError::InvalidKeyLength(other)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(AES-{}, <redacted>)", self.0.len() * 8)
    }
}

/// Generate a fresh key from the OS random source.
pub fn generate_key(length_bytes: usize) -> Result<Key> {
    if !matches!(length_bytes, 16 | 24 | 32) {
        return Err(StegoError::InvalidKeyLength(length_bytes));
    }
    let mut bytes = vec![0u8; length_bytes];
    OsRng.fill_bytes(&mut bytes);
    let key = Key::from_bytes(&bytes);
    bytes.zeroize();
    key
}

fn seal<C>(key: &[u8], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U16>,
{
    let cipher =
        C::new_from_slice(key).map_err(|_| StegoError::InvalidKeyLength(key.len()))?;
    // Output is ciphertext || tag
    cipher
        .encrypt(Nonce::<C>::from_slice(iv), plaintext)
        .map_err(|_| StegoError::FormatError("plaintext too long for AES-GCM".into()))
}

fn open<C>(key: &[u8], iv: &[u8], sealed: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U16>,
{
    let cipher = C::new_from_slice(key).map_err(|_| StegoError::AuthenticationError)?;
    cipher
        .decrypt(Nonce::<C>::from_slice(iv), sealed)
        .map_err(|_| StegoError::AuthenticationError)
}

/// Encrypt with a fresh random IV. Returns `IV || ciphertext || tag`.
pub fn encrypt(key: &Key, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let sealed = match key.len() {
        16 => seal::<Aes128Gcm16>(key.as_bytes(), &iv, plaintext)?,
        24 => seal::<Aes192Gcm16>(key.as_bytes(), &iv, plaintext)?,
        32 => seal::<Aes256Gcm16>(key.as_bytes(), &iv, plaintext)?,
        other => return Err(StegoError::InvalidKeyLength(other)),
    };

    let mut payload = Vec::with_capacity(IV_LEN + sealed.len());
    payload.extend_from_slice(&iv);
    payload.extend_from_slice(&sealed);
    Ok(payload)
}

/// Verify and decrypt `IV || ciphertext || tag`.
///
/// Every failure (short input, wrong key, tampering) is reported as the same
/// `AuthenticationError`.
pub fn decrypt(key: &Key, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(StegoError::AuthenticationError);
    }
    let (iv, sealed) = payload.split_at(IV_LEN);

    match key.len() {
        16 => open::<Aes128Gcm16>(key.as_bytes(), iv, sealed),
        24 => open::<Aes192Gcm16>(key.as_bytes(), iv, sealed),
        32 => open::<Aes256Gcm16>(key.as_bytes(), iv, sealed),
        _ => Err(StegoError::AuthenticationError),
    }
}

/// Prepend 1..=32 random padding bytes and their count.
pub fn add_obfuscation(payload: &[u8]) -> Vec<u8> {
    let padding_len = OsRng.gen_range(1..=MAX_RANDOM_PADDING);
    add_obfuscation_with(payload, padding_len)
}

/// Prepend exactly `padding_len` random bytes and their count.
pub fn add_obfuscation_with(payload: &[u8], padding_len: u8) -> Vec<u8> {
    let padding_len = padding_len as usize;
    let mut obfuscated = vec![0u8; 1 + padding_len + payload.len()];
    obfuscated[0] = padding_len as u8;
    OsRng.fill_bytes(&mut obfuscated[1..1 + padding_len]);
    obfuscated[1 + padding_len..].copy_from_slice(payload);
    obfuscated
}

/// Strip the padding added by `add_obfuscation`.
pub fn remove_obfuscation(payload: &[u8]) -> Result<Vec<u8>> {
    let Some(&padding_len) = payload.first() else {
        return Err(StegoError::FormatError("empty obfuscated payload".into()));
    };
    let body_start = 1 + padding_len as usize;
    if payload.len() < body_start + MIN_PAYLOAD_LEN {
        return Err(StegoError::FormatError(format!(
            "declared padding {} leaves {} bytes, need at least {}",
            padding_len,
            payload.len().saturating_sub(body_start),
            MIN_PAYLOAD_LEN
        )));
    }
    Ok(payload[body_start..].to_vec())
}
