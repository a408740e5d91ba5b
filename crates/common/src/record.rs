//! Row model shared by the write and read pipelines.
//!
//! Typed records and key/value rows both implement [`FieldAccess`], so the
//! pipelines never care which representation the host handed them.

use std::collections::HashMap;

use crate::error::FieldSecurityError;

/// Dynamically-typed field value. Serialised with `serde_json` before encryption.
pub type Value = serde_json::Value;

/// Ordered key/value row, as returned by map-shaped queries.
pub type RowMap = serde_json::Map<String, Value>;

/// Placeholder-keyed parameter values backing a partial update fragment.
pub type BindingMap = HashMap<String, Value>;

/// Uniform get/set-by-name contract over a single row.
pub trait FieldAccess {
    /// Read the named field. `None` means the row does not carry the field at all;
    /// a present-but-null field is `Some(Value::Null)`.
    fn get_field(&self, name: &str) -> Option<Value>;

    /// Overwrite the named field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldSecurityError::Access`] if the field is unknown or cannot
    /// hold `value`.
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldSecurityError>;

    /// Whether the row projection includes the named field.
    ///
    /// Typed records always carry every field, so the default is `true`. Map
    /// rows override this; the read pipeline skips verification for rows that
    /// do not project the signature store column.
    fn has_field(&self, _name: &str) -> bool {
        true
    }
}

impl FieldAccess for RowMap {
    fn get_field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldSecurityError> {
        self.insert(name.to_owned(), value);
        Ok(())
    }

    fn has_field(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

/// Per-query options supplied by the host alongside a result batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryContext {
    /// Return stored values untouched: no decryption, no verification.
    pub ignore_protection: bool,
}

impl QueryContext {
    /// Context for administrative "fetch raw ciphertext" reads.
    pub fn raw() -> Self {
        Self {
            ignore_protection: true,
        }
    }
}

/// Implement [`FieldAccess`] for a struct by routing each listed field through
/// `serde_json`.
///
/// Every listed field type must implement `Serialize` and `Deserialize`.
/// Encrypted fields should be `Option<String>` (or `String`) so they can hold
/// ciphertext text.
///
/// ```
/// use rowseal_common::{field_access, FieldAccess};
///
/// #[derive(Default)]
/// struct User {
///     mobile: Option<String>,
///     age: Option<i32>,
/// }
///
/// field_access!(User { mobile, age });
///
/// let mut user = User::default();
/// user.set_field("mobile", "13800001234".into()).unwrap();
/// assert_eq!(user.get_field("mobile"), Some("13800001234".into()));
/// ```
#[macro_export]
macro_rules! field_access {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::FieldAccess for $ty {
            fn get_field(&self, name: &str) -> ::core::option::Option<$crate::Value> {
                match name {
                    $(stringify!($field) => $crate::__private::serde_json::to_value(&self.$field).ok(),)*
                    _ => ::core::option::Option::None,
                }
            }

            fn set_field(
                &mut self,
                name: &str,
                value: $crate::Value,
            ) -> ::core::result::Result<(), $crate::FieldSecurityError> {
                match name {
                    $(stringify!($field) => {
                        self.$field = $crate::__private::serde_json::from_value(value).map_err(|e| {
                            $crate::FieldSecurityError::Access {
                                field: name.to_owned(),
                                reason: e.to_string(),
                            }
                        })?;
                        Ok(())
                    })*
                    _ => Err($crate::FieldSecurityError::Access {
                        field: name.to_owned(),
                        reason: "unknown field".to_owned(),
                    }),
                }
            }
        }
    };
}
