//! Per-type cache of resolved [`FieldPolicy`] values.
//!
//! Backed by `arc-swap`, so the hot path is a lock-free load. Misses resolve
//! outside any lock and publish with `rcu`; two threads missing on the same
//! type may both resolve it, and both results are equal.

use std::{
    any::{type_name, TypeId},
    collections::HashMap,
    sync::Arc,
};

use arc_swap::ArcSwap;
use rowseal_common::FieldSecurityError;
use tracing::debug;

use super::{FieldPolicy, Record};

type PolicyMap = HashMap<TypeId, Option<Arc<FieldPolicy>>>;

/// Shared, lock-free cache of resolved policies keyed by record type.
///
/// Entries live for the lifetime of the registry; record types are static, so
/// there is nothing to invalidate.
#[derive(Clone, Debug)]
pub struct PolicyRegistry {
    inner: Arc<ArcSwap<PolicyMap>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(Arc::new(HashMap::new()))),
        }
    }

    /// Number of record types resolved so far, protected or not.
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Cached policy for `T`, if it has been resolved.
    pub fn get<T: Record>(&self) -> Option<Option<Arc<FieldPolicy>>> {
        self.inner.load().get(&TypeId::of::<T>()).cloned()
    }

    /// Policy for `T`, resolving and caching it on first use.
    ///
    /// `validate` runs once per successful resolution, before the policy is
    /// published. A policy that fails validation is not cached, so every later
    /// call fails the same way.
    ///
    /// # Errors
    ///
    /// Returns the configuration error from [`FieldPolicy::resolve`] or from
    /// `validate`.
    pub fn resolve<T: Record>(
        &self,
        validate: impl FnOnce(&FieldPolicy) -> Result<(), FieldSecurityError>,
    ) -> Result<Option<Arc<FieldPolicy>>, FieldSecurityError> {
        if let Some(hit) = self.get::<T>() {
            return Ok(hit);
        }

        let policy = FieldPolicy::resolve(&T::describe())?.map(Arc::new);
        if let Some(p) = &policy {
            validate(p)?;
        }
        debug!(
            record = type_name::<T>(),
            protected = policy.is_some(),
            "resolved field policy"
        );

        let key = TypeId::of::<T>();
        self.inner.rcu(|current| {
            let mut next = PolicyMap::clone(current);
            next.entry(key).or_insert_with(|| policy.clone());
            next
        });
        Ok(policy)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rowseal_common::{FieldAccess, Value};

    use super::*;
    use crate::policy::{FieldDescriptor, TableDescriptor};

    struct Plain;
    struct Signed;
    struct Broken;

    macro_rules! no_fields {
        ($($ty:ty),*) => {$(
            impl FieldAccess for $ty {
                fn get_field(&self, _: &str) -> Option<Value> {
                    None
                }
                fn set_field(&mut self, _: &str, _: Value) -> Result<(), FieldSecurityError> {
                    Ok(())
                }
            }
        )*};
    }
    no_fields!(Plain, Signed, Broken);

    impl Record for Plain {
        fn describe() -> TableDescriptor {
            TableDescriptor::new("t_plain").field(FieldDescriptor::new("age"))
        }
    }

    impl Record for Signed {
        fn describe() -> TableDescriptor {
            TableDescriptor::new("t_signed")
                .with_signature()
                .field(FieldDescriptor::new("a").signature_input(1))
                .field(FieldDescriptor::new("sig").signature_store())
        }
    }

    impl Record for Broken {
        fn describe() -> TableDescriptor {
            TableDescriptor::new("t_broken")
                .with_signature()
                .field(FieldDescriptor::new("a").signature_input(1))
        }
    }

    fn ok(_: &FieldPolicy) -> Result<(), FieldSecurityError> {
        Ok(())
    }

    #[test]
    fn initially_empty() {
        let reg = PolicyRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.get::<Signed>().is_none());
    }

    #[test]
    fn unprotected_type_is_cached_as_none() {
        let reg = PolicyRegistry::new();
        assert!(reg.resolve::<Plain>(ok).unwrap().is_none());
        assert_eq!(reg.get::<Plain>(), Some(None));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn validate_runs_only_on_miss() {
        let reg = PolicyRegistry::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let p = reg
                .resolve::<Signed>(|_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            assert_eq!(p.unwrap().table, "t_signed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_validation_is_not_cached() {
        let reg = PolicyRegistry::new();
        let err = reg
            .resolve::<Signed>(|_| Err(FieldSecurityError::configuration("no signer")))
            .unwrap_err();
        assert_eq!(err.code(), "configuration");
        assert!(reg.get::<Signed>().is_none());
        assert!(reg.resolve::<Signed>(ok).unwrap().is_some());
    }

    #[test]
    fn invalid_descriptor_surfaces_on_every_use() {
        let reg = PolicyRegistry::new();
        assert!(reg.resolve::<Broken>(ok).is_err());
        assert!(reg.resolve::<Broken>(ok).is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn clones_share_the_cache() {
        let reg = PolicyRegistry::new();
        let other = reg.clone();
        reg.resolve::<Signed>(ok).unwrap();
        assert!(other.get::<Signed>().is_some());
    }
}
