//! Error taxonomy shared by every layer of the field security pipeline.

use std::fmt;

use thiserror::Error;

/// Top-level error returned by every pipeline operation.
///
/// Variants separate the remediation paths available to callers:
/// - [`FieldSecurityError::Configuration`]: fix the wiring or the descriptor table.
/// - [`FieldSecurityError::Crypto`]: bad key, corrupt ciphertext, serialisation failure.
/// - [`FieldSecurityError::Integrity`]: tamper alert or missing signature.
/// - [`FieldSecurityError::Access`]: a record refused a value through its accessor.
#[derive(Debug, Error)]
pub enum FieldSecurityError {
    /// Policy and handler wiring are inconsistent, or a descriptor table is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single field could not be encrypted, decrypted or digested.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A stored signature or whole-row HMAC is missing or does not match.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// The record could not read or write the named field.
    #[error("field `{field}` rejected value: {reason}")]
    Access {
        /// Field name as declared in the record's descriptor table.
        field: String,
        /// Why the accessor refused the value.
        reason: String,
    },
}

impl FieldSecurityError {
    /// Shorthand for a [`FieldSecurityError::Configuration`] error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        FieldSecurityError::Configuration(msg.into())
    }

    /// Returns `true` for tamper or missing-signature failures.
    pub fn is_integrity(&self) -> bool {
        matches!(self, FieldSecurityError::Integrity(_))
    }

    /// Short machine-readable code, suitable for metrics labels and audit logs.
    pub fn code(&self) -> &'static str {
        match self {
            FieldSecurityError::Configuration(_) => "configuration",
            FieldSecurityError::Crypto(_) => "crypto",
            FieldSecurityError::Integrity(_) => "integrity",
            FieldSecurityError::Access { .. } => "access",
        }
    }
}

/// Errors produced by the cipher, HMAC and encoding layers.
///
/// None of the variants carry plaintext, ciphertext or key bytes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key material does not fit the configured algorithm.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The IV has the wrong length, or was configured for a mode that forbids a fixed IV.
    #[error("invalid iv: {0}")]
    InvalidIv(String),

    /// AEAD sealing or opening failed (wrong key or tampered ciphertext).
    #[error("aead operation failed")]
    AeadFailure,

    /// Ciphertext text is not valid for the configured encoding or layout.
    #[error("invalid ciphertext encoding: {0}")]
    InvalidEncoding(String),

    /// Block padding is malformed after decryption.
    #[error("invalid padding")]
    InvalidPadding,

    /// The value could not be serialised to or parsed from its canonical text form.
    #[error("serialisation failed: {0}")]
    Serialization(String),
}

/// Which integrity check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityCheck {
    /// The joint signature over signature-input fields.
    JointSignature,
    /// The whole-row HMAC over encrypted fields.
    TableHmac,
}

impl fmt::Display for IntegrityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityCheck::JointSignature => f.write_str("joint signature"),
            IntegrityCheck::TableHmac => f.write_str("table hmac"),
        }
    }
}

/// How an integrity check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFailure {
    /// No stored value to compare against; the row needs re-signing.
    Missing,
    /// The recomputed value differs from the stored one; treat as tampering.
    Mismatch,
    /// The row projection lacks input columns, so the value cannot be recomputed.
    Incomplete,
}

/// Fail-closed verification error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{check} {} on table `{table}` columns [{}]", describe(.failure), .columns.join(","))]
pub struct IntegrityError {
    /// Table the failing row belongs to.
    pub table: String,
    /// Columns covered by the failing check.
    pub columns: Vec<String>,
    /// The check that failed.
    pub check: IntegrityCheck,
    /// Missing, mismatched or incomplete.
    pub failure: IntegrityFailure,
}

fn describe(failure: &IntegrityFailure) -> &'static str {
    match failure {
        IntegrityFailure::Missing => "missing",
        IntegrityFailure::Mismatch => "mismatch",
        IntegrityFailure::Incomplete => "incomplete projection",
    }
}
