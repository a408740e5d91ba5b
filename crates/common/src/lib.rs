//! Error taxonomy and row model shared across `rowseal` crates.

pub mod error;
pub mod record;

pub use error::{CryptoError, FieldSecurityError, IntegrityCheck, IntegrityError, IntegrityFailure};
pub use record::{BindingMap, FieldAccess, QueryContext, RowMap, Value};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
