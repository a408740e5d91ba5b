//! Joint signatures: ordered, delimiter-joined field text under one HMAC.

use std::{borrow::Cow, sync::Arc};

use rowseal_common::{CryptoError, Value};

use super::{cache::EngineCache, cipher::TextEncoding, digest::HmacSpec};

/// Separator placed between field texts before digesting.
pub const DELIMITER: char = '|';

/// Outcome of comparing a recomputed signature with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    /// Stored value present but different: treat as tampering.
    Mismatch,
    /// Nothing stored: the row was never signed or the signature was cleared.
    Missing,
}

/// Computes and checks joint signatures over an ordered value list.
#[cfg_attr(test, mockall::automock)]
pub trait Signer: Send + Sync {
    /// Signature text over `values`, in the order given.
    fn sign(&self, values: &[Value]) -> Result<String, CryptoError>;

    /// Compare the signature over `values` with `stored`. An empty `stored`
    /// reports [`Verification::Missing`].
    fn verify(&self, values: &[Value], stored: &str) -> Result<Verification, CryptoError>;
}

/// Text form of a value as it enters a signature. Null is the empty string and
/// strings are taken verbatim (no JSON quoting).
pub fn canonical_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Join the canonical text of `values` with [`DELIMITER`].
pub fn join_values(values: &[Value]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(&canonical_text(value));
    }
    out
}

/// [`Signer`] backed by an HMAC handle from the shared [`EngineCache`].
#[derive(Debug, Clone)]
pub struct JointSignatureEngine {
    cache: Arc<EngineCache>,
    spec: HmacSpec,
    encoding: TextEncoding,
}

impl JointSignatureEngine {
    /// # Errors
    ///
    /// Returns the [`CryptoError`] from keying the HMAC.
    pub fn new(
        cache: Arc<EngineCache>,
        spec: HmacSpec,
        encoding: TextEncoding,
    ) -> Result<Self, CryptoError> {
        cache.hmac(&spec)?;
        Ok(Self {
            cache,
            spec,
            encoding,
        })
    }
}

impl Signer for JointSignatureEngine {
    fn sign(&self, values: &[Value]) -> Result<String, CryptoError> {
        let tag = self.cache.hmac(&self.spec)?.digest(join_values(values).as_bytes());
        Ok(self.encoding.encode(&tag))
    }

    fn verify(&self, values: &[Value], stored: &str) -> Result<Verification, CryptoError> {
        if stored.trim().is_empty() {
            return Ok(Verification::Missing);
        }
        let Ok(tag) = self.encoding.decode(stored) else {
            return Ok(Verification::Mismatch);
        };
        let handle = self.cache.hmac(&self.spec)?;
        if handle.verify(join_values(values).as_bytes(), &tag) {
            Ok(Verification::Valid)
        } else {
            Ok(Verification::Mismatch)
        }
    }
}
