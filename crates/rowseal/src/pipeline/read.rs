//! Read path: decrypt, verify, mask.

use rowseal_common::{
    CryptoError, FieldAccess, FieldSecurityError, IntegrityCheck, IntegrityError, IntegrityFailure,
    QueryContext, RowMap, Value,
};
use tracing::{debug, warn};

use super::{apply_batch, FieldSecurity, Staged};
use crate::{
    crypto::{signature::canonical_text, Verification},
    masking,
    policy::{FieldPolicy, FieldRef, Record},
};

impl FieldSecurity {
    /// Decrypt and verify a batch of typed rows returned by a query.
    ///
    /// Verification is fail-closed. If any row fails, the error is returned and
    /// no row in the batch is modified.
    ///
    /// # Errors
    ///
    /// [`FieldSecurityError::Integrity`] when a stored signature or whole-row
    /// HMAC is missing or does not match; crypto, access and configuration
    /// errors as they occur.
    pub fn after_query<T: Record>(
        &self,
        ctx: &QueryContext,
        rows: &mut [T],
    ) -> Result<(), FieldSecurityError> {
        let Some(policy) = self.read_policy::<T>(ctx, rows.len())? else {
            return Ok(());
        };
        self.open_rows(&policy, rows)
    }

    /// [`FieldSecurity::after_query`] for map-shaped rows of record type `T`.
    ///
    /// A row that omits the signature store column is not verified. A row that
    /// carries the store column but omits one of its inputs fails with
    /// [`IntegrityFailure::Incomplete`].
    ///
    /// # Errors
    ///
    /// See [`FieldSecurity::after_query`].
    pub fn after_query_maps<T: Record>(
        &self,
        ctx: &QueryContext,
        rows: &mut [RowMap],
    ) -> Result<(), FieldSecurityError> {
        let Some(policy) = self.read_policy::<T>(ctx, rows.len())? else {
            return Ok(());
        };
        self.open_rows(&policy, rows)
    }

    fn read_policy<T: Record>(
        &self,
        ctx: &QueryContext,
        rows: usize,
    ) -> Result<Option<std::sync::Arc<FieldPolicy>>, FieldSecurityError> {
        if !self.options().decrypt_enabled || rows == 0 {
            return Ok(None);
        }
        if ctx.ignore_protection {
            debug!(record = std::any::type_name::<T>(), rows, "read protection bypassed");
            return Ok(None);
        }
        self.policy::<T>()
    }

    fn open_rows<R: FieldAccess>(&self, policy: &FieldPolicy, rows: &mut [R]) -> Result<(), FieldSecurityError> {
        let staged = rows
            .iter()
            .map(|row| self.open_row(policy, row))
            .collect::<Result<Vec<_>, _>>()?;
        apply_batch(rows, staged)?;
        debug!(table = %policy.table, rows = rows.len(), "rows opened");
        Ok(())
    }

    fn open_row(&self, policy: &FieldPolicy, row: &impl FieldAccess) -> Result<Staged, FieldSecurityError> {
        let mut staged = Staged::default();

        if !policy.encrypted.is_empty() {
            let cipher = self.cipher()?;
            for f in &policy.encrypted {
                match row.get_field(&f.name) {
                    None | Some(Value::Null) => {}
                    Some(Value::String(text)) if text.is_empty() => {}
                    Some(Value::String(text)) => staged.set(&f.name, cipher.decrypt(&text)?),
                    Some(_) => {
                        return Err(CryptoError::InvalidEncoding(format!(
                            "field `{}` does not hold ciphertext text",
                            f.name
                        ))
                        .into())
                    }
                }
            }
        }

        if self.options().verify_signatures {
            if let Some(hmac) = policy.table_hmac.as_ref().filter(|h| !h.inputs.is_empty()) {
                self.verify(policy, IntegrityCheck::TableHmac, &hmac.inputs, &hmac.store, row, &staged)?;
            }
            if let Some(sig) = &policy.signature {
                self.verify(policy, IntegrityCheck::JointSignature, &sig.inputs, &sig.store, row, &staged)?;
            }
        }

        for m in policy.masked.iter().filter(|m| m.rule.on_read) {
            if let Some(masked) = masking::mask_value(m.rule.kind, &staged.current(row, &m.field.name)) {
                staged.set(&m.field.name, masked);
            }
        }
        Ok(staged)
    }

    fn verify(
        &self,
        policy: &FieldPolicy,
        check: IntegrityCheck,
        inputs: &[FieldRef],
        store: &FieldRef,
        row: &impl FieldAccess,
        staged: &Staged,
    ) -> Result<(), FieldSecurityError> {
        let fail = |failure: IntegrityFailure, columns: Vec<String>| {
            warn!(table = %policy.table, %check, ?failure, "integrity check failed");
            FieldSecurityError::from(IntegrityError {
                table: policy.table.clone(),
                columns,
                check,
                failure,
            })
        };

        if !row.has_field(&store.name) {
            debug!(table = %policy.table, column = %store.column, %check, "store column not projected; not verified");
            return Ok(());
        }
        let unprojected: Vec<String> = inputs
            .iter()
            .filter(|f| !row.has_field(&f.name))
            .map(|f| f.column.clone())
            .collect();
        if !unprojected.is_empty() {
            return Err(fail(IntegrityFailure::Incomplete, unprojected));
        }

        let values: Vec<Value> = inputs.iter().map(|f| staged.current(row, &f.name)).collect();
        let stored = row.get_field(&store.name).unwrap_or(Value::Null);
        let columns = || inputs.iter().map(|f| f.column.clone()).collect();
        match self.signer()?.verify(&values, &canonical_text(&stored))? {
            Verification::Valid => Ok(()),
            Verification::Mismatch => Err(fail(IntegrityFailure::Mismatch, columns())),
            Verification::Missing => Err(fail(IntegrityFailure::Missing, columns())),
        }
    }
}
