//! Write path: entity, batch and condition updates.

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
};

use rowseal_common::{BindingMap, FieldAccess, FieldSecurityError, Value};
use tracing::{debug, warn};

use super::{
    fragment::{self, UnsupportedShape},
    apply_batch, FieldSecurity, Staged, WriteFailurePolicy, WriteOperation, WriteOutcome,
};
use crate::{
    masking,
    policy::{FieldPolicy, FieldRef, Record},
};

impl FieldSecurity {
    /// Run the write pipeline for any [`WriteOperation`].
    ///
    /// # Errors
    ///
    /// See [`FieldSecurity::write_entity`].
    pub fn write<T: Record>(
        &self,
        op: WriteOperation<'_, T>,
    ) -> Result<WriteOutcome, FieldSecurityError> {
        match op {
            WriteOperation::Entity(record) => self.write_entity(record),
            WriteOperation::Condition { fragment, bindings } => {
                self.write_condition::<T>(fragment, bindings)
            }
            WriteOperation::Batch(records) => self.write_batch(records),
        }
    }

    /// Mask, sign and encrypt `record` in place before it is inserted or updated.
    ///
    /// # Errors
    ///
    /// Configuration errors always propagate. Crypto and access errors
    /// propagate under [`WriteFailurePolicy::Abort`]; under
    /// [`WriteFailurePolicy::Suppress`] they are logged and reported as
    /// [`WriteOutcome::Suppressed`]. Either way `record` is left unchanged.
    pub fn write_entity<T: Record>(&self, record: &mut T) -> Result<WriteOutcome, FieldSecurityError> {
        let Some(policy) = self.policy::<T>()? else {
            return Ok(WriteOutcome::Proceed);
        };
        self.settle(&policy.table, || {
            let staged = self.seal_row(&policy, &*record)?;
            staged.apply(record)
        })
        .map(outcome)
    }

    /// [`FieldSecurity::write_entity`] for every element. Every record is
    /// staged before any is changed.
    ///
    /// # Errors
    ///
    /// See [`FieldSecurity::write_entity`].
    pub fn write_batch<T: Record>(&self, records: &mut [T]) -> Result<WriteOutcome, FieldSecurityError> {
        if records.is_empty() {
            return Ok(WriteOutcome::Proceed);
        }
        let Some(policy) = self.policy::<T>()? else {
            return Ok(WriteOutcome::Proceed);
        };
        self.settle(&policy.table, || {
            let staged = records
                .iter()
                .map(|record| self.seal_row(&policy, record))
                .collect::<Result<Vec<_>, _>>()?;
            apply_batch(records, staged)?;
            debug!(table = %policy.table, rows = records.len(), "batch sealed");
            Ok(())
        })
        .map(outcome)
    }

    /// Rewrite the bindings behind a partial update of `T`.
    ///
    /// Only columns assigned through a placeholder can be rewritten. Literal
    /// assignments to protected columns are logged and left alone. A joint
    /// signature or whole-row HMAC is recomputed only when all of its input
    /// columns and its store column are placeholder-bound. When any protected
    /// column had to be left alone the result is [`WriteOutcome::Degraded`]:
    /// the rows it updates will likely fail verification on the next read.
    ///
    /// # Errors
    ///
    /// See [`FieldSecurity::write_entity`].
    pub fn write_condition<T: Record>(
        &self,
        fragment: &str,
        bindings: &mut BindingMap,
    ) -> Result<WriteOutcome, FieldSecurityError> {
        let Some(policy) = self.policy::<T>()? else {
            return Ok(WriteOutcome::Proceed);
        };
        let assignments = fragment::parse(fragment);
        if assignments.is_empty() {
            return Ok(WriteOutcome::Proceed);
        }
        let slots = Slots {
            assignments: &assignments,
            bindings: &*bindings,
            fs: self,
            skipped: Cell::new(0),
        };
        let Some(staged) = self.settle(&policy.table, || slots.seal(&policy))? else {
            return Ok(WriteOutcome::Suppressed);
        };
        let skipped = slots.skipped.get();
        bindings.extend(staged);
        if skipped > 0 {
            return Ok(WriteOutcome::Degraded { skipped });
        }
        Ok(WriteOutcome::Proceed)
    }

    /// Encrypt the encrypted fields of a query-by-example `record` so equality
    /// filters match stored ciphertext. Nothing is signed or masked.
    ///
    /// # Errors
    ///
    /// Returns [`FieldSecurityError::Configuration`] if the cipher is not
    /// deterministic, and any crypto or access error otherwise.
    pub fn encrypt_lookup<T: Record>(&self, record: &mut T) -> Result<(), FieldSecurityError> {
        let Some(policy) = self.policy::<T>()? else {
            return Ok(());
        };
        if policy.encrypted.is_empty() {
            return Ok(());
        }
        let cipher = self.cipher()?;
        if !cipher.is_deterministic() {
            return Err(FieldSecurityError::configuration(format!(
                "table `{}`: lookups on encrypted columns need a deterministic cipher (gcm-siv with a fixed iv)",
                policy.table
            )));
        }
        let mut staged = Staged::default();
        for f in &policy.encrypted {
            match record.get_field(&f.name) {
                None | Some(Value::Null) => {}
                Some(value) => staged.set(&f.name, Value::String(cipher.encrypt(&value)?)),
            }
        }
        staged.apply(record)
    }

    fn seal_row(&self, policy: &FieldPolicy, row: &impl FieldAccess) -> Result<Staged, FieldSecurityError> {
        let mut staged = Staged::default();

        for m in policy.masked.iter().filter(|m| m.rule.on_write) {
            if let Some(masked) = row
                .get_field(&m.field.name)
                .and_then(|v| masking::mask_value(m.rule.kind, &v))
            {
                staged.set(&m.field.name, masked);
            }
        }

        if let Some(hmac) = policy.table_hmac.as_ref().filter(|h| !h.inputs.is_empty()) {
            let values = plaintext(&staged, row, &hmac.inputs);
            staged.set(&hmac.store.name, Value::String(self.signer()?.sign(&values)?));
        }
        if let Some(sig) = &policy.signature {
            let values = plaintext(&staged, row, &sig.inputs);
            staged.set(&sig.store.name, Value::String(self.signer()?.sign(&values)?));
        }

        if !policy.encrypted.is_empty() {
            let cipher = self.cipher()?;
            for f in &policy.encrypted {
                let value = staged.current(row, &f.name);
                if !value.is_null() {
                    staged.set(&f.name, Value::String(cipher.encrypt(&value)?));
                }
            }
        }
        Ok(staged)
    }

    /// Apply the write-failure policy. `Ok(None)` means suppressed.
    fn settle<R>(
        &self,
        table: &str,
        step: impl FnOnce() -> Result<R, FieldSecurityError>,
    ) -> Result<Option<R>, FieldSecurityError> {
        match step() {
            Ok(r) => Ok(Some(r)),
            Err(e @ FieldSecurityError::Configuration(_)) => Err(e),
            Err(e) => match self.options().on_write_failure {
                WriteFailurePolicy::Abort => Err(e),
                WriteFailurePolicy::Suppress => {
                    warn!(table, error = %e, code = e.code(), "write protection failed; statement suppressed");
                    Ok(None)
                }
            },
        }
    }
}

fn outcome(settled: Option<()>) -> WriteOutcome {
    match settled {
        Some(()) => WriteOutcome::Proceed,
        None => WriteOutcome::Suppressed,
    }
}

fn plaintext(staged: &Staged, row: &impl FieldAccess, inputs: &[FieldRef]) -> Vec<Value> {
    inputs.iter().map(|f| staged.current(row, &f.name)).collect()
}

/// Condition-write view: column assignments resolved through the binding map.
struct Slots<'a> {
    assignments: &'a HashMap<String, String>,
    bindings: &'a BindingMap,
    fs: &'a FieldSecurity,
    /// Protected columns or signatures left as the statement had them.
    skipped: Cell<usize>,
}

impl Slots<'_> {
    /// Binding key behind `field`'s column. `Ok(None)` when the column is not assigned.
    fn key(&self, field: &FieldRef) -> Result<Option<String>, UnsupportedShape> {
        let Some(expression) = self.assignments.get(&field.column) else {
            return Ok(None);
        };
        let Some(key) = self.fs.options().placeholder.binding_key(expression) else {
            return Err(UnsupportedShape::Literal {
                column: field.column.clone(),
            });
        };
        if !self.bindings.contains_key(key) {
            return Err(UnsupportedShape::UnboundPlaceholder {
                column: field.column.clone(),
                binding: key.to_owned(),
            });
        }
        Ok(Some(key.to_owned()))
    }

    fn value(&self, staged: &HashMap<String, Value>, key: &str) -> Value {
        staged
            .get(key)
            .or_else(|| self.bindings.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn seal(&self, policy: &FieldPolicy) -> Result<HashMap<String, Value>, FieldSecurityError> {
        let table = policy.table.as_str();
        let mut staged: HashMap<String, Value> = HashMap::new();

        for m in policy.masked.iter().filter(|m| m.rule.on_write) {
            match self.key(&m.field) {
                Ok(Some(key)) => {
                    if let Some(masked) = masking::mask_value(m.rule.kind, &self.value(&staged, &key)) {
                        staged.insert(key, masked);
                    }
                }
                Ok(None) => {}
                Err(shape) => self.skip(table, &shape),
            }
        }

        if let Some(hmac) = policy.table_hmac.as_ref().filter(|h| !h.inputs.is_empty()) {
            self.resign(table, "whole-row hmac", &hmac.inputs, &hmac.store, &mut staged)?;
        }
        if let Some(sig) = &policy.signature {
            self.resign(table, "joint signature", &sig.inputs, &sig.store, &mut staged)?;
        }

        let mut rewritten = HashSet::new();
        if !policy.encrypted.is_empty() {
            let cipher = self.fs.cipher()?;
            for f in &policy.encrypted {
                let key = match self.key(f) {
                    Ok(Some(key)) => key,
                    Ok(None) => continue,
                    Err(shape) => {
                        self.skip(table, &shape);
                        continue;
                    }
                };
                // One binding may back several columns; encrypt it once.
                if !rewritten.insert(key.clone()) {
                    continue;
                }
                let value = self.value(&staged, &key);
                if !value.is_null() {
                    staged.insert(key, Value::String(cipher.encrypt(&value)?));
                }
            }
        }
        debug!(table, bindings = staged.len(), "condition write sealed");
        Ok(staged)
    }

    /// Recompute a signature whose inputs and store are all placeholder-bound.
    fn resign(
        &self,
        table: &str,
        what: &'static str,
        inputs: &[FieldRef],
        store: &FieldRef,
        staged: &mut HashMap<String, Value>,
    ) -> Result<(), FieldSecurityError> {
        let store_key = self.key(store);
        let input_keys: Vec<_> = inputs.iter().map(|f| self.key(f)).collect();

        let touched = !matches!(store_key, Ok(None))
            || input_keys.iter().any(|k| !matches!(k, Ok(None)));
        if !touched {
            return Ok(());
        }

        let unbound: Vec<String> = inputs
            .iter()
            .chain(std::iter::once(store))
            .zip(input_keys.iter().chain(std::iter::once(&store_key)))
            .filter(|(_, key)| !matches!(key, Ok(Some(_))))
            .map(|(f, _)| f.column.clone())
            .collect();
        if !unbound.is_empty() {
            self.skip(
                table,
                &UnsupportedShape::PartialAssignment {
                    what,
                    table: table.to_owned(),
                    columns: unbound,
                },
            );
            return Ok(());
        }

        let values: Vec<Value> = input_keys
            .iter()
            .flatten()
            .flatten()
            .map(|key| self.value(staged, key))
            .collect();
        let signature = self.fs.signer()?.sign(&values)?;
        if let Ok(Some(key)) = store_key {
            staged.insert(key, Value::String(signature));
        }
        Ok(())
    }

    fn skip(&self, table: &str, shape: &UnsupportedShape) {
        self.skipped.set(self.skipped.get() + 1);
        warn!(table, reason = %shape, "condition write field left unprotected");
    }
}
