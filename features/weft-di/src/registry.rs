//! Per-container registration store.
//!
//! Read-heavy: lookups take a read lock, register and overwrite take the
//! write lock. Registration order is tracked with a process-wide sequence so
//! snapshot resolution (`resolve_all`) is ordered across container levels.

use std::{
    any::TypeId,
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;

use crate::{
    descriptor::TypeDescriptor,
    errors::ConfigError,
    lifetimes::LifetimeManager,
    types::{BuildKey, DynError, GenericArgs, GenericFamily, Instance, TypeInfo},
};

pub(crate) type CoerceFn = Arc<dyn Fn(Instance) -> Result<Instance, DynError> + Send + Sync>;
pub(crate) type DecorateFn = Arc<dyn Fn(Instance) -> Result<Instance, DynError> + Send + Sync>;
pub(crate) type DisposeFn = Arc<dyn Fn(&Instance) -> Result<(), DynError> + Send + Sync>;
pub(crate) type LifetimeFactory = Arc<dyn Fn() -> Arc<dyn LifetimeManager> + Send + Sync>;
pub(crate) type GenericBindFn =
    Arc<dyn Fn(&GenericArgs) -> Result<TypeDescriptor, String> + Send + Sync>;

static REGISTRATION_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_seq() -> u64 {
    REGISTRATION_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// The implementation type a key is mapped onto, plus the coercion from the
/// built implementation back to the registered surface type
#[derive(Clone)]
pub(crate) struct MappedTarget {
    pub info: TypeInfo,
    pub coerce: CoerceFn,
}

/// How a registration sources its instances
#[derive(Clone)]
pub(crate) enum RegistrationKind {
    /// Built from a descriptor through the compiled plan
    Constructed,
    /// Instance registration; the record holds the value and the chain
    /// decorates and caches it like any built instance
    SeededValue(Instance),
    /// Instance registration held weakly by the lifetime manager
    SeededExternal,
}

/// One committed registration record.
///
/// Cloning shares the lifetime manager; it exists for [Registry::amend],
/// which replaces a record in place without re-claiming anything.
#[derive(Clone)]
pub(crate) struct Registration {
    pub key: BuildKey,
    pub mapped: Option<MappedTarget>,
    pub lifetime: Arc<dyn LifetimeManager>,
    /// Explicit injection members, overriding the descriptor registry
    pub members: Option<Arc<TypeDescriptor>>,
    pub kind: RegistrationKind,
    pub disposer: Option<DisposeFn>,
    pub decorators: Vec<DecorateFn>,
    pub seq: u64,
}

/// An unbound generic registration: binds a closed request on first resolve
pub(crate) struct OpenGeneric {
    pub family: GenericFamily,
    pub lifetime_factory: LifetimeFactory,
    pub bind: GenericBindFn,
    pub disposer: Option<DisposeFn>,
}

/// One container level's registrations
#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<HashMap<BuildKey, Arc<Registration>>>,
    open: RwLock<HashMap<&'static str, Arc<OpenGeneric>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the mapping for the exact (type, name)
    pub fn insert(&self, registration: Registration) {
        let mut entries = self.entries.write();
        entries.insert(registration.key.clone(), Arc::new(registration));
    }

    pub fn get(&self, key: &BuildKey) -> Option<Arc<Registration>> {
        self.entries.read().get(key).cloned()
    }

    /// Replace a stored registration through a closure without re-claiming
    /// its lifetime manager. Returns false when the key is unknown.
    pub fn amend(
        &self,
        key: &BuildKey,
        amend: impl FnOnce(&Registration) -> Registration,
    ) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(existing) => {
                let amended = amend(existing);
                entries.insert(key.clone(), Arc::new(amended));
                true
            }
            None => false,
        }
    }

    pub fn register_open(&self, open: OpenGeneric) {
        self.open.write().insert(open.family.name, Arc::new(open));
    }

    pub fn has_open(&self, family_name: &str) -> bool {
        self.open.read().contains_key(family_name)
    }

    /// Bind a closed-generic request against a matching open registration.
    ///
    /// Returns `Ok(None)` when no open registration covers the request's
    /// family. The bound closed registration is cached in the entry map, so
    /// every later resolve of the same closed key reuses one lifetime
    /// manager.
    pub fn bind_open(&self, key: &BuildKey) -> Result<Option<Arc<Registration>>, ConfigError> {
        let Some(generic) = key.generic.as_deref() else {
            return Ok(None);
        };
        let Some(open) = self.open.read().get(generic.family.name).cloned() else {
            return Ok(None);
        };

        if generic.args.len() != open.family.arity {
            return Err(ConfigError::GenericArityMismatch {
                family: open.family,
                got: generic.args.len(),
            });
        }

        let descriptor = (open.bind)(generic).map_err(|reason| ConfigError::GenericBindFailed {
            family: open.family,
            key: key.clone(),
            reason,
        })?;

        let lifetime = (open.lifetime_factory)();
        if !lifetime.claim() {
            return Err(ConfigError::LifetimeReused { key: key.clone() });
        }

        tracing::debug!("bound open generic {} for {}", open.family, key);

        let bound = Registration {
            key: key.clone(),
            mapped: None,
            lifetime,
            members: Some(Arc::new(descriptor)),
            kind: RegistrationKind::Constructed,
            disposer: open.disposer.clone(),
            decorators: Vec::new(),
            seq: next_seq(),
        };

        let mut entries = self.entries.write();
        // Another thread may have bound the same key in the meantime
        let registration = entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(bound))
            .clone();
        Ok(Some(registration))
    }

    /// Every named registration of the element type at this level
    pub fn named_for(&self, element: TypeId) -> Vec<Arc<Registration>> {
        self.entries
            .read()
            .values()
            .filter(|registration| {
                registration.key.info.type_id == element && registration.key.name.is_some()
            })
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<Registration>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn contains(&self, key: &BuildKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Drop every record; called on container dispose so cached lifetime
    /// state is released with the level
    pub fn clear(&self) {
        self.entries.write().clear();
        self.open.write().clear();
    }
}

/// Known type descriptors, the self-registration fallback source
#[derive(Default)]
pub(crate) struct DescriptorRegistry {
    entries: RwLock<HashMap<TypeId, Arc<TypeDescriptor>>>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, descriptor: TypeDescriptor) {
        self.entries
            .write()
            .insert(descriptor.info.type_id, Arc::new(descriptor));
    }

    pub fn get(&self, type_id: TypeId) -> Option<Arc<TypeDescriptor>> {
        self.entries.read().get(&type_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetimes::Transient;

    fn plain(key: BuildKey) -> Registration {
        Registration {
            key,
            mapped: None,
            lifetime: Arc::new(Transient::new()),
            members: None,
            kind: RegistrationKind::Constructed,
            disposer: None,
            decorators: Vec::new(),
            seq: next_seq(),
        }
    }

    #[test]
    fn insert_overwrites_exact_key() {
        let registry = Registry::new();
        registry.insert(plain(BuildKey::of::<u32>()));
        let first_seq = registry.get(&BuildKey::of::<u32>()).unwrap().seq;
        registry.insert(plain(BuildKey::of::<u32>()));
        let second_seq = registry.get(&BuildKey::of::<u32>()).unwrap().seq;
        assert_ne!(first_seq, second_seq);
    }

    #[test]
    fn named_enumeration_skips_the_default_entry() {
        let registry = Registry::new();
        registry.insert(plain(BuildKey::of::<u32>()));
        registry.insert(plain(BuildKey::named::<u32>("a")));
        registry.insert(plain(BuildKey::named::<u32>("b")));
        registry.insert(plain(BuildKey::named::<u64>("other")));

        let named = registry.named_for(TypeId::of::<u32>());
        assert_eq!(named.len(), 2);
        assert!(named.iter().all(|r| r.key.name.is_some()));
    }

    #[test]
    fn amend_requires_existing_key() {
        let registry = Registry::new();
        assert!(!registry.amend(&BuildKey::of::<u32>(), |_| unreachable!()));
    }
}
