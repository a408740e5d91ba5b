//! Write and read pipelines, and the [`FieldSecurity`] facade that runs them.
//!
//! # Responsibilities
//!
//! - Before a write: mask, sign and encrypt protected fields of an entity, a
//!   batch of entities, or the bindings behind a partial-update fragment.
//! - After a read: decrypt protected fields, verify the whole-row HMAC and the
//!   joint signature, then mask for display.
//!
//! # Ordering contract
//!
//! Signatures and the whole-row HMAC cover plaintext. On write they are
//! computed before encryption; on read they are verified after decryption.
//! All changes are staged and applied to the row only once every step has
//! succeeded, so a failing row is never left half-transformed.

pub mod fragment;
mod read;
mod write;

pub use fragment::{PlaceholderPattern, UnsupportedShape};

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use rowseal_common::{BindingMap, FieldAccess, FieldSecurityError, Value};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    config::Settings,
    crypto::{EngineCache, FieldCipher, FieldCryptoEngine, JointSignatureEngine, Signer},
    policy::{FieldPolicy, PolicyRegistry, Record},
};

/// What to do when encryption or signing fails on the write path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteFailurePolicy {
    /// Return the error to the caller.
    #[default]
    Abort,
    /// Log the error and tell the caller to skip the statement.
    Suppress,
}

/// Whether the host should go on to issue the write.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Proceed,
    /// A condition write left `skipped` protected columns or signatures as
    /// the statement had them (see [`UnsupportedShape`]). The statement may be
    /// issued, but rows it updates can carry plaintext or a stale signature
    /// and will fail verification on read until they are rewritten whole.
    Degraded { skipped: usize },
    /// A protection step failed under [`WriteFailurePolicy::Suppress`]; the
    /// statement must not be issued.
    Suppressed,
}

impl WriteOutcome {
    /// `false` only for [`WriteOutcome::Suppressed`].
    pub fn should_issue(self) -> bool {
        !matches!(self, WriteOutcome::Suppressed)
    }
}

/// The three update shapes the write pipeline accepts.
pub enum WriteOperation<'a, T> {
    Entity(&'a mut T),
    Condition {
        fragment: &'a str,
        bindings: &'a mut BindingMap,
    },
    Batch(&'a mut [T]),
}

/// Behaviour switches for both pipelines.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Global read-path switch. When off, reads return stored values as-is.
    pub decrypt_enabled: bool,
    /// Verify joint signatures and whole-row HMACs on read.
    pub verify_signatures: bool,
    pub on_write_failure: WriteFailurePolicy,
    pub placeholder: PlaceholderPattern,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            decrypt_enabled: true,
            verify_signatures: true,
            on_write_failure: WriteFailurePolicy::Abort,
            placeholder: PlaceholderPattern::default(),
        }
    }
}

struct Inner {
    registry: PolicyRegistry,
    cipher: Option<Arc<dyn FieldCipher>>,
    signer: Option<Arc<dyn Signer>>,
    options: PipelineOptions,
}

/// Entry point for hosts: one instance per process, cheap to clone.
#[derive(Clone)]
pub struct FieldSecurity {
    inner: Arc<Inner>,
}

impl FieldSecurity {
    /// Builder wired with the engines described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`FieldSecurityError::Configuration`] if the settings fail
    /// [`Settings::validate`] or do not yield a usable cipher or HMAC.
    pub fn builder(settings: &Settings) -> Result<FieldSecurityBuilder, FieldSecurityError> {
        let rejected = |e: anyhow::Error| FieldSecurityError::configuration(format!("{e:#}"));
        settings.validate().map_err(rejected)?;
        let cache = Arc::new(EngineCache::new(
            settings.engine_cache_max_entries,
            Duration::from_secs(settings.engine_cache_idle_secs),
        ));

        let cipher = FieldCryptoEngine::new(
            Arc::clone(&cache),
            settings.cipher_spec().map_err(rejected)?,
            settings.ciphertext_encoding,
        )
        .map_err(|e| FieldSecurityError::configuration(format!("cipher settings rejected: {e}")))?;
        let signer = JointSignatureEngine::new(
            cache,
            settings.hmac_spec().map_err(rejected)?,
            settings.ciphertext_encoding,
        )
        .map_err(|e| FieldSecurityError::configuration(format!("hmac settings rejected: {e}")))?;

        Ok(
            FieldSecurityBuilder::new(settings.pipeline_options().map_err(rejected)?)
                .with_cipher(Arc::new(cipher))
                .with_signer(Arc::new(signer)),
        )
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.inner.registry
    }

    /// Resolved policy for `T`, checked against the wired handlers on first use.
    pub(crate) fn policy<T: Record>(&self) -> Result<Option<Arc<FieldPolicy>>, FieldSecurityError> {
        self.inner
            .registry
            .resolve::<T>(|policy| self.check_wiring(policy))
    }

    fn check_wiring(&self, policy: &FieldPolicy) -> Result<(), FieldSecurityError> {
        if policy.needs_cipher() && self.inner.cipher.is_none() {
            return Err(FieldSecurityError::configuration(format!(
                "table `{}` has encrypted fields but no field cipher is configured",
                policy.table
            )));
        }
        if policy.needs_signer() && self.inner.signer.is_none() {
            return Err(FieldSecurityError::configuration(format!(
                "table `{}` is signed but no signer is configured",
                policy.table
            )));
        }
        Ok(())
    }

    pub(crate) fn cipher(&self) -> Result<&dyn FieldCipher, FieldSecurityError> {
        self.inner
            .cipher
            .as_deref()
            .ok_or_else(|| FieldSecurityError::configuration("no field cipher is configured"))
    }

    pub(crate) fn signer(&self) -> Result<&dyn Signer, FieldSecurityError> {
        self.inner
            .signer
            .as_deref()
            .ok_or_else(|| FieldSecurityError::configuration("no signer is configured"))
    }
}

impl fmt::Debug for FieldSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSecurity")
            .field("registry", &self.inner.registry)
            .field("cipher", &self.inner.cipher.is_some())
            .field("signer", &self.inner.signer.is_some())
            .field("options", &self.inner.options)
            .finish()
    }
}

type Warmup = fn(&FieldSecurity) -> Result<(), FieldSecurityError>;

fn warm<T: Record>(fs: &FieldSecurity) -> Result<(), FieldSecurityError> {
    fs.policy::<T>().map(drop)
}

/// Assembles a [`FieldSecurity`] and checks registered record types up front.
pub struct FieldSecurityBuilder {
    options: PipelineOptions,
    cipher: Option<Arc<dyn FieldCipher>>,
    signer: Option<Arc<dyn Signer>>,
    warmups: Vec<Warmup>,
}

impl FieldSecurityBuilder {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            cipher: None,
            signer: None,
            warmups: Vec::new(),
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn FieldCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Resolve and wiring-check `T` during [`FieldSecurityBuilder::build`].
    pub fn register<T: Record>(mut self) -> Self {
        self.warmups.push(warm::<T>);
        self
    }

    /// # Errors
    ///
    /// Returns [`FieldSecurityError::Configuration`] if any registered type has
    /// an invalid descriptor table or needs a handler that was not supplied.
    pub fn build(self) -> Result<FieldSecurity, FieldSecurityError> {
        let fs = FieldSecurity {
            inner: Arc::new(Inner {
                registry: PolicyRegistry::new(),
                cipher: self.cipher,
                signer: self.signer,
                options: self.options,
            }),
        };
        for warmup in &self.warmups {
            warmup(&fs)?;
        }
        info!(
            registered = self.warmups.len(),
            resolved = fs.registry().len(),
            cipher = fs.inner.cipher.is_some(),
            signer = fs.inner.signer.is_some(),
            "field security pipeline ready"
        );
        Ok(fs)
    }
}

impl fmt::Debug for FieldSecurityBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSecurityBuilder")
            .field("options", &self.options)
            .field("cipher", &self.cipher.is_some())
            .field("signer", &self.signer.is_some())
            .field("registered", &self.warmups.len())
            .finish()
    }
}

/// Field changes computed for one row, applied only after every step succeeded.
///
/// Holds plaintext, so it deliberately has no `Debug` impl.
#[derive(Default)]
pub(crate) struct Staged(HashMap<String, Value>);

impl Staged {
    pub(crate) fn set(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_owned(), value);
    }

    /// Staged value for `name`, else the row's own value, else null.
    pub(crate) fn current(&self, row: &impl FieldAccess, name: &str) -> Value {
        self.0
            .get(name)
            .cloned()
            .or_else(|| row.get_field(name))
            .unwrap_or(Value::Null)
    }

    /// Write every staged value into `row`. If the row rejects one, the values
    /// already written are restored before the error is returned.
    pub(crate) fn apply(self, row: &mut impl FieldAccess) -> Result<(), FieldSecurityError> {
        self.apply_undoable(row).map(drop)
    }

    /// [`Staged::apply`], returning what it takes to put `row` back.
    fn apply_undoable(self, row: &mut impl FieldAccess) -> Result<Undo, FieldSecurityError> {
        let mut undo = Undo(Vec::with_capacity(self.0.len()));
        for (name, value) in self.0 {
            let before = row.get_field(&name).unwrap_or(Value::Null);
            if let Err(e) = row.set_field(&name, value) {
                undo.restore(row);
                return Err(e);
            }
            undo.0.push((name, before));
        }
        Ok(undo)
    }
}

/// Previous values of the fields a [`Staged`] overwrote. No `Debug`, same as `Staged`.
struct Undo(Vec<(String, Value)>);

impl Undo {
    fn restore(self, row: &mut impl FieldAccess) {
        for (name, old) in self.0.into_iter().rev() {
            if let Err(e) = row.set_field(&name, old) {
                warn!(field = %name, error = %e, "rollback failed; row left partially updated");
            }
        }
    }
}

/// Apply one [`Staged`] per row. If any row rejects its changes, every row
/// already updated is restored, so the batch is changed entirely or not at all.
pub(crate) fn apply_batch<R: FieldAccess>(
    rows: &mut [R],
    staged: Vec<Staged>,
) -> Result<(), FieldSecurityError> {
    let mut applied: Vec<Undo> = Vec::with_capacity(staged.len());
    for (i, staged) in staged.into_iter().enumerate() {
        let Some(row) = rows.get_mut(i) else {
            break;
        };
        match staged.apply_undoable(row) {
            Ok(undo) => applied.push(undo),
            Err(e) => {
                for (row, undo) in rows.iter_mut().zip(applied).rev() {
                    undo.restore(row);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}
