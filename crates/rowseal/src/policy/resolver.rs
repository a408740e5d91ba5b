//! Resolution of a [`TableDescriptor`] into an ordered, validated policy.
//!
//! Ordering is load-bearing: the same ordered field list is used to compute a
//! signature at write time and to recompute it on read. Fields sort by their
//! explicit order ascending, ties broken by column name ascending.

use std::collections::HashSet;

use rowseal_common::FieldSecurityError;

use super::{FieldDescriptor, TableDescriptor};
use crate::masking::MaskRule;

/// A field's accessor name and storage column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub name: String,
    pub column: String,
}

impl From<&FieldDescriptor> for FieldRef {
    fn from(f: &FieldDescriptor) -> Self {
        Self {
            name: f.name.clone(),
            column: f.column.clone(),
        }
    }
}

/// Inputs and store field for the whole-row HMAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHmacPolicy {
    /// Encrypted fields flagged for the HMAC, in encryption order.
    pub inputs: Vec<FieldRef>,
    pub store: FieldRef,
}

/// Inputs and store field for the joint signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePolicy {
    /// Signature inputs, in signature order.
    pub inputs: Vec<FieldRef>,
    pub store: FieldRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedField {
    pub field: FieldRef,
    pub rule: MaskRule,
}

/// Everything the pipelines need to know about one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPolicy {
    pub table: String,
    /// Encrypted fields, in encryption order.
    pub encrypted: Vec<FieldRef>,
    pub table_hmac: Option<TableHmacPolicy>,
    pub signature: Option<SignaturePolicy>,
    pub masked: Vec<MaskedField>,
}

impl FieldPolicy {
    /// Resolve `table`. Returns `None` when the table carries no protection at all.
    ///
    /// # Errors
    ///
    /// Returns [`FieldSecurityError::Configuration`] when the descriptor table is
    /// inconsistent: duplicate field names, a field that is both a signature
    /// store and a signature input, a missing or repeated store field, an
    /// encrypted store field, or a whole-row HMAC without encryption.
    pub fn resolve(table: &TableDescriptor) -> Result<Option<Self>, FieldSecurityError> {
        let name = &table.table;
        let mut seen = HashSet::new();
        for f in &table.fields {
            if !seen.insert(f.name.as_str()) {
                return Err(config(name, format!("field `{}` declared twice", f.name)));
            }
        }

        let encrypted = if table.encryption_enabled {
            ordered(
                table.fields.iter().filter(|f| f.encrypted),
                |f| f.encryption_order,
            )
        } else {
            Vec::new()
        };

        let table_hmac = if table.table_hmac_enabled {
            if !table.encryption_enabled {
                return Err(config(name, "whole-row hmac requires encryption to be enabled"));
            }
            let store = single_store(table, |f| f.is_table_hmac_store, "table hmac store")?;
            Some(TableHmacPolicy {
                inputs: ordered(
                    table
                        .fields
                        .iter()
                        .filter(|f| f.encrypted && f.include_in_table_hmac),
                    |f| f.encryption_order,
                ),
                store,
            })
        } else {
            None
        };

        let signature = if table.signature_enabled {
            if let Some(f) = table
                .fields
                .iter()
                .find(|f| f.is_signature_store && f.signature_input)
            {
                return Err(config(
                    name,
                    format!("field `{}` is both signature store and signature input", f.name),
                ));
            }
            let store = single_store(table, |f| f.is_signature_store, "signature store")?;
            let inputs = ordered(
                table.fields.iter().filter(|f| {
                    !f.is_signature_store
                        && !f.is_table_hmac_store
                        && (table.signature_union_all || f.signature_input)
                }),
                |f| f.signature_order,
            );
            if inputs.is_empty() {
                return Err(config(name, "signature enabled but no signature input fields"));
            }
            Some(SignaturePolicy { inputs, store })
        } else {
            None
        };

        let masked: Vec<MaskedField> = table
            .fields
            .iter()
            .filter_map(|f| {
                f.mask.filter(MaskRule::is_active).map(|rule| MaskedField {
                    field: FieldRef::from(f),
                    rule,
                })
            })
            .collect();

        if encrypted.is_empty() && table_hmac.is_none() && signature.is_none() && masked.is_empty()
        {
            return Ok(None);
        }

        Ok(Some(Self {
            table: name.clone(),
            encrypted,
            table_hmac,
            signature,
            masked,
        }))
    }

    /// Policy requires a [`FieldCipher`](crate::crypto::FieldCipher).
    pub fn needs_cipher(&self) -> bool {
        !self.encrypted.is_empty()
    }

    /// Policy requires a [`Signer`](crate::crypto::Signer).
    pub fn needs_signer(&self) -> bool {
        self.table_hmac.is_some() || self.signature.is_some()
    }
}

fn ordered<'a>(
    fields: impl Iterator<Item = &'a FieldDescriptor>,
    order: impl Fn(&FieldDescriptor) -> i32,
) -> Vec<FieldRef> {
    let mut fields: Vec<&FieldDescriptor> = fields.collect();
    fields.sort_by(|a, b| order(a).cmp(&order(b)).then_with(|| a.column.cmp(&b.column)));
    fields.into_iter().map(FieldRef::from).collect()
}

fn single_store(
    table: &TableDescriptor,
    is_store: impl Fn(&FieldDescriptor) -> bool,
    what: &str,
) -> Result<FieldRef, FieldSecurityError> {
    let mut stores = table.fields.iter().filter(|f| is_store(f));
    let store = stores
        .next()
        .ok_or_else(|| config(&table.table, format!("no {what} field declared")))?;
    if stores.next().is_some() {
        return Err(config(&table.table, format!("more than one {what} field declared")));
    }
    if store.encrypted {
        return Err(config(
            &table.table,
            format!("{what} field `{}` must not be encrypted", store.name),
        ));
    }
    Ok(FieldRef::from(store))
}

fn config(table: &str, msg: impl std::fmt::Display) -> FieldSecurityError {
    FieldSecurityError::configuration(format!("table `{table}`: {msg}"))
}
