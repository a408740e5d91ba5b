//! Symmetric field encryption, HMAC joint signatures and their handle cache.
//!
//! # Ciphertext format
//!
//! ```text
//! fixed iv:   encode(ciphertext+tag)
//! random iv:  encode(nonce || ciphertext+tag)
//! ```
//!
//! `encode` is base64 (standard alphabet, padded) or lowercase hex, chosen
//! once in configuration. HMAC digests use the same encoding.
//!
//! # Module invariants
//!
//! - **No pipeline dependencies.** Nothing here knows about records, policies
//!   or fragments.
//! - **No secrets in logs.** Key material, plaintext and ciphertext are never
//!   passed to `tracing`.

pub mod cache;
pub mod cipher;
pub mod digest;
pub mod engine;
pub mod signature;

pub use cache::EngineCache;
pub use cipher::{
    CipherHandle, CipherMode, CipherSpec, KeyMaterial, Padding, SymmetricAlgorithm, TextEncoding,
};
pub use digest::{HmacAlgorithm, HmacHandle, HmacSpec};
pub use engine::{FieldCipher, FieldCryptoEngine};
pub use signature::{JointSignatureEngine, Signer, Verification};
