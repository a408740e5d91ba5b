//! AES-GCM-SIV / AES-GCM sealing and opening of serialised field values.
//!
//! **Mode choice:** AES-GCM-SIV (RFC 8452) is nonce-misuse-resistant. With a
//! configured IV it is deterministic: identical plaintext + key always produce
//! the same ciphertext, which is what equality lookups on encrypted columns need.
//!
//! **Never configure plain AES-GCM with a fixed IV.** GCM nonce reuse breaks
//! both confidentiality and authentication; [`CipherHandle::new`] rejects it.

use std::fmt;

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes128GcmSiv, Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rowseal_common::CryptoError;
use serde::Deserialize;

/// Byte length of an AES-GCM / AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Block size used by [`Padding::Pkcs7`].
pub const BLOCK_LEN: usize = 16;

/// Symmetric algorithm, identified by key size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymmetricAlgorithm {
    Aes128,
    Aes256,
}

impl SymmetricAlgorithm {
    /// Required key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            SymmetricAlgorithm::Aes128 => 16,
            SymmetricAlgorithm::Aes256 => 32,
        }
    }
}

/// Block cipher mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherMode {
    GcmSiv,
    Gcm,
}

/// Plaintext padding applied before sealing.
///
/// Both supported modes are stream-like, so padding only serves to hide the
/// exact plaintext length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    None,
    Pkcs7,
}

impl Padding {
    fn pad(self, plaintext: &[u8]) -> Vec<u8> {
        match self {
            Padding::None => plaintext.to_vec(),
            Padding::Pkcs7 => {
                let n = BLOCK_LEN - plaintext.len() % BLOCK_LEN;
                let mut out = Vec::with_capacity(plaintext.len() + n);
                out.extend_from_slice(plaintext);
                out.resize(plaintext.len() + n, n as u8);
                out
            }
        }
    }

    fn unpad(self, mut padded: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
        match self {
            Padding::None => Ok(padded),
            Padding::Pkcs7 => {
                let n = *padded.last().ok_or(CryptoError::InvalidPadding)? as usize;
                if n == 0 || n > BLOCK_LEN || n > padded.len() {
                    return Err(CryptoError::InvalidPadding);
                }
                let body = padded.len() - n;
                if padded[body..].iter().any(|&b| b as usize != n) {
                    return Err(CryptoError::InvalidPadding);
                }
                padded.truncate(body);
                Ok(padded)
            }
        }
    }
}

/// Text encoding for ciphertext and HMAC digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    Base64,
    Hex,
}

impl TextEncoding {
    /// Encode raw bytes as text.
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Base64 => STANDARD.encode(bytes),
            TextEncoding::Hex => hex::encode(bytes),
        }
    }

    /// Decode text produced by [`TextEncoding::encode`] with the same variant.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidEncoding`] if `text` is not valid for this encoding.
    pub fn decode(self, text: &str) -> Result<Vec<u8>, CryptoError> {
        match self {
            TextEncoding::Base64 => STANDARD
                .decode(text.trim())
                .map_err(|_| CryptoError::InvalidEncoding("not valid base64".into())),
            TextEncoding::Hex => hex::decode(text.trim())
                .map_err(|_| CryptoError::InvalidEncoding("not valid hex".into())),
        }
    }
}

/// Secret key bytes.
///
/// The buffer is overwritten with zeroes on drop and never printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Wrap raw key bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode base64 key text, as supplied in configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidEncoding`] if `text` is not valid base64.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        TextEncoding::Base64.decode(text).map(Self)
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

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Everything needed to construct a [`CipherHandle`]; doubles as its cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CipherSpec {
    pub algorithm: SymmetricAlgorithm,
    pub mode: CipherMode,
    pub padding: Padding,
    pub key: KeyMaterial,
    /// Fixed nonce. `None` draws a fresh random nonce per seal.
    pub iv: Option<[u8; NONCE_LEN]>,
}

enum AeadCipher {
    Aes128GcmSiv(Aes128GcmSiv),
    Aes256GcmSiv(Aes256GcmSiv),
    Aes128Gcm(Aes128Gcm),
    Aes256Gcm(Aes256Gcm),
}

impl AeadCipher {
    fn encrypt(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AeadCipher::Aes128GcmSiv(c) => c.encrypt(nonce, plaintext),
            AeadCipher::Aes256GcmSiv(c) => c.encrypt(nonce, plaintext),
            AeadCipher::Aes128Gcm(c) => c.encrypt(nonce, plaintext),
            AeadCipher::Aes256Gcm(c) => c.encrypt(nonce, plaintext),
        }
        .map_err(|_| CryptoError::AeadFailure)
    }

    fn decrypt(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AeadCipher::Aes128GcmSiv(c) => c.decrypt(nonce, ciphertext),
            AeadCipher::Aes256GcmSiv(c) => c.decrypt(nonce, ciphertext),
            AeadCipher::Aes128Gcm(c) => c.decrypt(nonce, ciphertext),
            AeadCipher::Aes256Gcm(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| CryptoError::AeadFailure)
    }
}

/// A keyed, immutable cipher instance.
///
/// Handles are stateless between calls, so equivalent handles are interchangeable
/// and may be shared across threads.
pub struct CipherHandle {
    aead: AeadCipher,
    padding: Padding,
    fixed_nonce: Option<[u8; NONCE_LEN]>,
}

impl CipherHandle {
    /// Build a handle from `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the key does not match the
    /// algorithm, and [`CryptoError::InvalidIv`] if a fixed IV is combined with
    /// plain GCM.
    pub fn new(spec: &CipherSpec) -> Result<Self, CryptoError> {
        let expected = spec.algorithm.key_len();
        if spec.key.len() != expected {
            return Err(CryptoError::InvalidKeyLength {
                expected,
                actual: spec.key.len(),
            });
        }
        if spec.mode == CipherMode::Gcm && spec.iv.is_some() {
            return Err(CryptoError::InvalidIv(
                "a fixed iv is not allowed with gcm; use gcm-siv".into(),
            ));
        }

        let key = spec.key.as_bytes();
        let bad_key = |_| CryptoError::InvalidKeyLength {
            expected,
            actual: key.len(),
        };
        let aead = match (spec.algorithm, spec.mode) {
            (SymmetricAlgorithm::Aes128, CipherMode::GcmSiv) => {
                AeadCipher::Aes128GcmSiv(Aes128GcmSiv::new_from_slice(key).map_err(bad_key)?)
            }
            (SymmetricAlgorithm::Aes256, CipherMode::GcmSiv) => {
                AeadCipher::Aes256GcmSiv(Aes256GcmSiv::new_from_slice(key).map_err(bad_key)?)
            }
            (SymmetricAlgorithm::Aes128, CipherMode::Gcm) => {
                AeadCipher::Aes128Gcm(Aes128Gcm::new_from_slice(key).map_err(bad_key)?)
            }
            (SymmetricAlgorithm::Aes256, CipherMode::Gcm) => {
                AeadCipher::Aes256Gcm(Aes256Gcm::new_from_slice(key).map_err(bad_key)?)
            }
        };

        Ok(Self {
            aead,
            padding: spec.padding,
            fixed_nonce: spec.iv,
        })
    }

    /// `true` when identical plaintext always seals to identical bytes.
    pub fn is_deterministic(&self) -> bool {
        self.fixed_nonce.is_some()
    }

    /// Seal `plaintext`.
    ///
    /// With a fixed IV the output is the bare ciphertext+tag; otherwise it is
    /// `nonce || ciphertext+tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let padded = self.padding.pad(plaintext);
        match &self.fixed_nonce {
            Some(nonce) => self.aead.encrypt(nonce, &padded),
            None => {
                let mut nonce = [0u8; NONCE_LEN];
                OsRng.fill_bytes(&mut nonce);
                let sealed = self.aead.encrypt(&nonce, &padded)?;
                let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
                out.extend_from_slice(&nonce);
                out.extend_from_slice(&sealed);
                Ok(out)
            }
        }
    }

    /// Open bytes produced by [`CipherHandle::seal`] on an equivalent handle.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::AeadFailure`] if authentication fails (wrong key or
    /// tampered data).
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let padded = match &self.fixed_nonce {
            Some(nonce) => self.aead.decrypt(nonce, data)?,
            None => {
                if data.len() < NONCE_LEN {
                    return Err(CryptoError::InvalidEncoding("ciphertext shorter than nonce".into()));
                }
                let (head, body) = data.split_at(NONCE_LEN);
                let mut nonce = [0u8; NONCE_LEN];
                nonce.copy_from_slice(head);
                self.aead.decrypt(&nonce, body)?
            }
        };
        self.padding.unpad(padded)
    }
}

impl fmt::Debug for CipherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherHandle")
            .field("padding", &self.padding)
            .field("deterministic", &self.is_deterministic())
            .finish_non_exhaustive()
    }
}
