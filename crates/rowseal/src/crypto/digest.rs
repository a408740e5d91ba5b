//! Keyed HMAC instances.

use hmac::{digest::KeyInit, Hmac, Mac};
use rowseal_common::CryptoError;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use super::cipher::KeyMaterial;

/// HMAC digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HmacAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

/// Algorithm + key; doubles as the cache key for [`HmacHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HmacSpec {
    pub algorithm: HmacAlgorithm,
    pub key: KeyMaterial,
}

/// A keyed HMAC prototype. Every digest runs on a clone, so the handle itself
/// is never mutated and can be shared freely.
#[derive(Clone)]
pub enum HmacHandle {
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl HmacHandle {
    /// Key a new HMAC instance.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] for an empty key.
    pub fn new(spec: &HmacSpec) -> Result<Self, CryptoError> {
        let key = spec.key.as_bytes();
        if key.is_empty() {
            return Err(CryptoError::InvalidKeyLength {
                expected: 1,
                actual: 0,
            });
        }
        Ok(match spec.algorithm {
            HmacAlgorithm::Sha1 => HmacHandle::Sha1(keyed(key)?),
            HmacAlgorithm::Sha256 => HmacHandle::Sha256(keyed(key)?),
            HmacAlgorithm::Sha384 => HmacHandle::Sha384(keyed(key)?),
            HmacAlgorithm::Sha512 => HmacHandle::Sha512(keyed(key)?),
        })
    }

    /// Compute the tag over `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HmacHandle::Sha1(m) => finalize(m, data),
            HmacHandle::Sha256(m) => finalize(m, data),
            HmacHandle::Sha384(m) => finalize(m, data),
            HmacHandle::Sha512(m) => finalize(m, data),
        }
    }

    /// Constant-time comparison of the tag over `data` against `tag`.
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        match self {
            HmacHandle::Sha1(m) => check(m, data, tag),
            HmacHandle::Sha256(m) => check(m, data, tag),
            HmacHandle::Sha384(m) => check(m, data, tag),
            HmacHandle::Sha512(m) => check(m, data, tag),
        }
    }
}

impl std::fmt::Debug for HmacHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let alg = match self {
            HmacHandle::Sha1(_) => "sha1",
            HmacHandle::Sha256(_) => "sha256",
            HmacHandle::Sha384(_) => "sha384",
            HmacHandle::Sha512(_) => "sha512",
        };
        write!(f, "HmacHandle({alg}, [REDACTED])")
    }
}

fn keyed<M: KeyInit>(key: &[u8]) -> Result<M, CryptoError> {
    M::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 1,
        actual: key.len(),
    })
}

fn finalize<M: Mac + Clone>(proto: &M, data: &[u8]) -> Vec<u8> {
    let mut mac = proto.clone();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn check<M: Mac + Clone>(proto: &M, data: &[u8], tag: &[u8]) -> bool {
    let mut mac = proto.clone();
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(algorithm: HmacAlgorithm) -> HmacHandle {
        HmacHandle::new(&HmacSpec {
            algorithm,
            key: KeyMaterial::new(b"key".to_vec()),
        })
        .unwrap()
    }

    #[test]
    fn sha256_matches_rfc_vector() {
        // HMAC-SHA256(key="key", "The quick brown fox jumps over the lazy dog")
        let tag = handle(HmacAlgorithm::Sha256).digest(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            hex::encode(tag),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn digest_lengths_follow_algorithm() {
        assert_eq!(handle(HmacAlgorithm::Sha1).digest(b"x").len(), 20);
        assert_eq!(handle(HmacAlgorithm::Sha256).digest(b"x").len(), 32);
        assert_eq!(handle(HmacAlgorithm::Sha384).digest(b"x").len(), 48);
        assert_eq!(handle(HmacAlgorithm::Sha512).digest(b"x").len(), 64);
    }

    #[test]
    fn handle_is_reusable() {
        let h = handle(HmacAlgorithm::Sha256);
        assert_eq!(h.digest(b"a|b"), h.digest(b"a|b"));
    }

    #[test]
    fn verify_accepts_own_tag_and_rejects_others() {
        let h = handle(HmacAlgorithm::Sha512);
        let tag = h.digest(b"payload");
        assert!(h.verify(b"payload", &tag));
        assert!(!h.verify(b"payload!", &tag));
        assert!(!h.verify(b"payload", &tag[..10]));
    }

    #[test]
    fn empty_key_rejected() {
        let spec = HmacSpec {
            algorithm: HmacAlgorithm::Sha256,
            key: KeyMaterial::new(Vec::new()),
        };
        assert!(HmacHandle::new(&spec).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        assert!(format!("{:?}", handle(HmacAlgorithm::Sha1)).contains("REDACTED"));
    }
}
