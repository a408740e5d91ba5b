//! Declarative protection metadata and its per-type resolution.
//!
//! # Responsibilities
//!
//! - Describe, per record type, which fields are encrypted, signed, covered by
//!   the whole-row HMAC or masked ([`TableDescriptor`], [`FieldDescriptor`]).
//! - Resolve a descriptor table into an ordered, validated [`FieldPolicy`].
//! - Cache resolved policies by type identity ([`PolicyRegistry`]).
//!
//! Descriptor tables are built in code, once per type, through [`Record::describe`].
//! Nothing is discovered at runtime.

pub mod registry;
pub mod resolver;

pub use registry::PolicyRegistry;
pub use resolver::{FieldPolicy, FieldRef, MaskedField, SignaturePolicy, TableHmacPolicy};

use rowseal_common::FieldAccess;

use crate::masking::MaskRule;

/// A record type that carries a protection descriptor table.
///
/// ```
/// use rowseal::policy::{FieldDescriptor, Record, TableDescriptor};
/// use rowseal_common::field_access;
///
/// #[derive(Default)]
/// struct User {
///     mobile: Option<String>,
///     email: Option<String>,
///     signature: Option<String>,
/// }
///
/// field_access!(User { mobile, email, signature });
///
/// impl Record for User {
///     fn describe() -> TableDescriptor {
///         TableDescriptor::new("t_user")
///             .with_signature()
///             .field(FieldDescriptor::new("mobile").signature_input(1))
///             .field(FieldDescriptor::new("email").signature_input(2))
///             .field(FieldDescriptor::new("signature").signature_store())
///     }
/// }
/// ```
pub trait Record: FieldAccess + 'static {
    fn describe() -> TableDescriptor;
}

/// Table-level protection switches plus the field list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDescriptor {
    pub table: String,
    pub encryption_enabled: bool,
    /// Whole-row HMAC over encrypted fields. Requires `encryption_enabled`.
    pub table_hmac_enabled: bool,
    pub signature_enabled: bool,
    /// Sign every field except the store field, instead of only marked inputs.
    pub signature_union_all: bool,
    pub fields: Vec<FieldDescriptor>,
}

impl TableDescriptor {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn with_encryption(mut self) -> Self {
        self.encryption_enabled = true;
        self
    }

    pub fn with_table_hmac(mut self) -> Self {
        self.table_hmac_enabled = true;
        self
    }

    pub fn with_signature(mut self) -> Self {
        self.signature_enabled = true;
        self
    }

    pub fn signature_union_all(mut self) -> Self {
        self.signature_enabled = true;
        self.signature_union_all = true;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

/// Per-field protection flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Accessor name, as understood by [`FieldAccess`].
    pub name: String,
    /// Storage column. Defaults to `name`.
    pub column: String,
    pub encrypted: bool,
    pub include_in_table_hmac: bool,
    pub encryption_order: i32,
    pub signature_input: bool,
    pub signature_order: i32,
    /// This field holds the joint signature.
    pub is_signature_store: bool,
    /// This field holds the whole-row HMAC.
    pub is_table_hmac_store: bool,
    pub mask: Option<MaskRule>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            encrypted: false,
            include_in_table_hmac: false,
            encryption_order: 0,
            signature_input: false,
            signature_order: 0,
            is_signature_store: false,
            is_table_hmac_store: false,
            mask: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Encrypted and covered by the whole-row HMAC at position `order`.
    pub fn in_table_hmac(mut self, order: i32) -> Self {
        self.encrypted = true;
        self.include_in_table_hmac = true;
        self.encryption_order = order;
        self
    }

    pub fn encryption_order(mut self, order: i32) -> Self {
        self.encryption_order = order;
        self
    }

    pub fn signature_input(mut self, order: i32) -> Self {
        self.signature_input = true;
        self.signature_order = order;
        self
    }

    pub fn signature_store(mut self) -> Self {
        self.is_signature_store = true;
        self
    }

    pub fn table_hmac_store(mut self) -> Self {
        self.is_table_hmac_store = true;
        self
    }

    pub fn mask(mut self, rule: MaskRule) -> Self {
        self.mask = Some(rule);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masking::MaskKind;

    #[test]
    fn column_defaults_to_name() {
        let f = FieldDescriptor::new("mobile");
        assert_eq!(f.column, "mobile");
        assert_eq!(FieldDescriptor::new("mobile").column("mobile_no").column, "mobile_no");
    }

    #[test]
    fn table_hmac_input_implies_encrypted() {
        let f = FieldDescriptor::new("mobile").in_table_hmac(2);
        assert!(f.encrypted && f.include_in_table_hmac);
        assert_eq!(f.encryption_order, 2);
    }

    #[test]
    fn union_all_enables_signature() {
        let t = TableDescriptor::new("t").signature_union_all();
        assert!(t.signature_enabled && t.signature_union_all);
    }

    #[test]
    fn builder_collects_fields_in_declaration_order() {
        let t = TableDescriptor::new("t_user")
            .with_encryption()
            .field(FieldDescriptor::new("a").encrypted())
            .field(FieldDescriptor::new("b").mask(MaskRule::read(MaskKind::Default)));
        assert_eq!(t.table, "t_user");
        assert!(t.encryption_enabled);
        let names: Vec<_> = t.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
