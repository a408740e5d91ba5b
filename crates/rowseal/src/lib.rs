//! Field-level encryption, joint signatures and whole-row HMAC for
//! data-access layers.
//!
//! A host data-access layer calls into [`FieldSecurity`] at two hook points:
//!
//! - **before a write**: [`FieldSecurity::write_entity`],
//!   [`FieldSecurity::write_batch`] or [`FieldSecurity::write_condition`]
//!   mask, sign and encrypt protected fields;
//! - **after a read**: [`FieldSecurity::after_query`] or
//!   [`FieldSecurity::after_query_maps`] decrypt protected fields and verify
//!   stored signatures, failing closed on any mismatch.
//!
//! Which fields are protected is declared per record type through
//! [`policy::Record::describe`]. Keys and algorithms come from
//! [`config::Settings`].
//!
//! ```
//! use std::sync::Arc;
//!
//! use rowseal::crypto::{
//!     CipherMode, CipherSpec, EngineCache, FieldCryptoEngine, HmacAlgorithm, HmacSpec,
//!     JointSignatureEngine, KeyMaterial, Padding, SymmetricAlgorithm, TextEncoding,
//! };
//! use rowseal::policy::{FieldDescriptor, Record, TableDescriptor};
//! use rowseal::{FieldSecurityBuilder, PipelineOptions, WriteOutcome};
//! use rowseal_common::{field_access, QueryContext};
//!
//! #[derive(Default)]
//! struct User {
//!     mobile: Option<String>,
//!     signature: Option<String>,
//! }
//!
//! field_access!(User { mobile, signature });
//!
//! impl Record for User {
//!     fn describe() -> TableDescriptor {
//!         TableDescriptor::new("t_user")
//!             .with_encryption()
//!             .with_signature()
//!             .field(FieldDescriptor::new("mobile").encrypted().signature_input(1))
//!             .field(FieldDescriptor::new("signature").signature_store())
//!     }
//! }
//!
//! let cache = Arc::new(EngineCache::default());
//! let cipher = FieldCryptoEngine::new(
//!     Arc::clone(&cache),
//!     CipherSpec {
//!         algorithm: SymmetricAlgorithm::Aes256,
//!         mode: CipherMode::GcmSiv,
//!         padding: Padding::None,
//!         key: KeyMaterial::new(vec![7u8; 32]),
//!         iv: None,
//!     },
//!     TextEncoding::Base64,
//! )?;
//! let signer = JointSignatureEngine::new(
//!     cache,
//!     HmacSpec { algorithm: HmacAlgorithm::Sha256, key: KeyMaterial::new(b"mac".to_vec()) },
//!     TextEncoding::Base64,
//! )?;
//!
//! let security = FieldSecurityBuilder::new(PipelineOptions::default())
//!     .with_cipher(Arc::new(cipher))
//!     .with_signer(Arc::new(signer))
//!     .register::<User>()
//!     .build()?;
//!
//! let mut user = User { mobile: Some("13800001234".into()), signature: None };
//! assert_eq!(security.write_entity(&mut user)?, WriteOutcome::Proceed);
//! assert_ne!(user.mobile.as_deref(), Some("13800001234"));
//!
//! let mut rows = [user];
//! security.after_query(&QueryContext::default(), &mut rows)?;
//! assert_eq!(rows[0].mobile.as_deref(), Some("13800001234"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod crypto;
pub mod masking;
pub mod pipeline;
pub mod policy;
pub mod telemetry;

pub use config::Settings;
pub use pipeline::{
    FieldSecurity, FieldSecurityBuilder, PipelineOptions, WriteFailurePolicy, WriteOperation,
    WriteOutcome,
};
pub use rowseal_common::{
    BindingMap, CryptoError, FieldAccess, FieldSecurityError, IntegrityCheck, IntegrityError,
    IntegrityFailure, QueryContext, RowMap, Value,
};
