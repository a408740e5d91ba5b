//! Single-value encryption: canonical serialisation, seal, text-encode.

use std::sync::Arc;

use rowseal_common::{CryptoError, Value};
use serde::de::DeserializeOwned;

use super::{
    cache::EngineCache,
    cipher::{CipherSpec, TextEncoding},
};

/// Encrypts and decrypts one field value at a time.
///
/// `decrypt(encrypt(x)) == x` for every value `x`.
#[cfg_attr(test, mockall::automock)]
pub trait FieldCipher: Send + Sync {
    /// Serialise `value` canonically, seal it and encode the result as text.
    fn encrypt(&self, value: &Value) -> Result<String, CryptoError>;

    /// Inverse of [`FieldCipher::encrypt`].
    fn decrypt(&self, text: &str) -> Result<Value, CryptoError>;

    /// `true` when equal values always encrypt to equal text, which equality
    /// lookups on encrypted columns depend on.
    fn is_deterministic(&self) -> bool;
}

/// [`FieldCipher`] backed by the shared [`EngineCache`].
#[derive(Debug, Clone)]
pub struct FieldCryptoEngine {
    cache: Arc<EngineCache>,
    spec: CipherSpec,
    encoding: TextEncoding,
}

impl FieldCryptoEngine {
    /// Build the engine and its cipher handle up front so a bad key fails here
    /// rather than on the first write.
    ///
    /// # Errors
    ///
    /// Returns the [`CryptoError`] from building the cipher handle.
    pub fn new(
        cache: Arc<EngineCache>,
        spec: CipherSpec,
        encoding: TextEncoding,
    ) -> Result<Self, CryptoError> {
        cache.cipher(&spec)?;
        Ok(Self {
            cache,
            spec,
            encoding,
        })
    }

    /// Decrypt straight into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Serialization`] if the plaintext does not
    /// deserialise into `T`, or any error from [`FieldCipher::decrypt`].
    pub fn decrypt_as<T: DeserializeOwned>(&self, text: &str) -> Result<T, CryptoError> {
        let value = self.decrypt(text)?;
        serde_json::from_value(value).map_err(|e| CryptoError::Serialization(e.to_string()))
    }
}

impl FieldCipher for FieldCryptoEngine {
    fn encrypt(&self, value: &Value) -> Result<String, CryptoError> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        let sealed = self.cache.cipher(&self.spec)?.seal(&plaintext)?;
        Ok(self.encoding.encode(&sealed))
    }

    fn decrypt(&self, text: &str) -> Result<Value, CryptoError> {
        let sealed = self.encoding.decode(text)?;
        let plaintext = self.cache.cipher(&self.spec)?.open(&sealed)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    fn is_deterministic(&self) -> bool {
        self.spec.iv.is_some()
    }
}
