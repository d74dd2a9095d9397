//! Instance-caching policies.
//!
//! A lifetime manager decides whether a resolve may reuse a cached instance
//! and where a freshly built instance is kept. Managers are pluggable; the
//! five shipped policies are:
//!
//! 1. [Transient] - never caches
//! 2. [ContainerControlled] - one instance for the registering container and
//!    all of its children, disposed with that container
//! 3. [Hierarchical] - one instance per container level
//! 4. [PerResolve] - shared across the dependency subgraph of a single
//!    top-level resolve, discarded afterwards
//! 5. [ExternallyControlled] - holds only a weak reference
//!
//! A manager instance belongs to exactly one registration. Registering the
//! same manager twice is a configuration error, enforced through [claim].
//!
//! [claim]: LifetimeManager::claim

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::types::{BuildKey, Injectable, Instance};

/// The cache coordinates visible to a manager during one build step
pub struct LifetimeScope<'a> {
    /// Id of the container the resolve was issued on
    pub(crate) level: u64,
    pub(crate) key: &'a BuildKey,
    /// Cache shared across one top-level resolve call
    pub(crate) per_resolve: &'a mut HashMap<BuildKey, Instance>,
}

/// Who is responsible for disposing a stored instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOwner {
    /// Nobody; the instance lives only as long as its own references
    None,
    /// The container the registration lives on
    Registration,
    /// The container the resolve was issued on
    Level,
}

/// Result of handing a freshly built instance to a manager.
///
/// `instance` is the canonical one. Under a concurrent first-resolve race the
/// loser's duplicate is dropped here and the winner's instance comes back,
/// the compare-and-swap discipline of the container-controlled policy.
pub struct StoreOutcome {
    pub instance: Instance,
    pub newly_stored: bool,
    pub owner: StoreOwner,
}

impl StoreOutcome {
    fn passthrough(instance: Instance) -> Self {
        StoreOutcome {
            instance,
            newly_stored: false,
            owner: StoreOwner::None,
        }
    }
}

pub trait LifetimeManager: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attach this manager to a registration. Returns false if it already
    /// belongs to another one.
    fn claim(&self) -> bool;

    fn get(&self, scope: &mut LifetimeScope<'_>) -> Option<Instance>;

    fn store(&self, scope: &mut LifetimeScope<'_>, instance: Instance) -> StoreOutcome;

    /// Take custody of a pre-built instance at registration time. `None`
    /// means the policy does not hold seeded instances itself; the
    /// registration record keeps the value instead. Only policies that must
    /// not keep the value alive (externally-controlled) implement this.
    fn seed(&self, level: u64, instance: Instance) -> Option<StoreOwner> {
        let _ = (level, instance);
        None
    }

    /// Forget cached state of a disposed container level
    fn evict_level(&self, level: u64) {
        let _ = level;
    }
}

/// One-shot ownership flag shared by all manager implementations
#[derive(Default)]
struct Claim(AtomicBool);
impl Claim {
    fn take(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Never caches; every resolve constructs a new instance
#[derive(Default)]
pub struct Transient {
    claim: Claim,
}
impl Transient {
    pub fn new() -> Self {
        Self::default()
    }
}
impl LifetimeManager for Transient {
    fn name(&self) -> &'static str {
        "transient"
    }
    fn claim(&self) -> bool {
        self.claim.take()
    }
    fn get(&self, _scope: &mut LifetimeScope<'_>) -> Option<Instance> {
        None
    }
    fn store(&self, _scope: &mut LifetimeScope<'_>, instance: Instance) -> StoreOutcome {
        StoreOutcome::passthrough(instance)
    }
}

/// One instance for the registering container and all children
#[derive(Default)]
pub struct ContainerControlled {
    claim: Claim,
    slot: OnceCell<Instance>,
}
impl ContainerControlled {
    pub fn new() -> Self {
        Self::default()
    }
}
impl LifetimeManager for ContainerControlled {
    fn name(&self) -> &'static str {
        "container-controlled"
    }
    fn claim(&self) -> bool {
        self.claim.take()
    }
    fn get(&self, _scope: &mut LifetimeScope<'_>) -> Option<Instance> {
        self.slot.get().cloned()
    }
    fn store(&self, _scope: &mut LifetimeScope<'_>, instance: Instance) -> StoreOutcome {
        match self.slot.try_insert(instance) {
            Ok(stored) => StoreOutcome {
                instance: stored.clone(),
                newly_stored: true,
                owner: StoreOwner::Registration,
            },
            // Lost the first-resolve race: hand back the winner's instance
            Err((winner, _duplicate)) => StoreOutcome {
                instance: winner.clone(),
                newly_stored: false,
                owner: StoreOwner::None,
            },
        }
    }
}

/// One instance per container level; each child caches its own
#[derive(Default)]
pub struct Hierarchical {
    claim: Claim,
    slots: Mutex<HashMap<u64, Instance>>,
}
impl Hierarchical {
    pub fn new() -> Self {
        Self::default()
    }
}
impl LifetimeManager for Hierarchical {
    fn name(&self) -> &'static str {
        "hierarchical"
    }
    fn claim(&self) -> bool {
        self.claim.take()
    }
    fn get(&self, scope: &mut LifetimeScope<'_>) -> Option<Instance> {
        self.slots.lock().get(&scope.level).cloned()
    }
    fn store(&self, scope: &mut LifetimeScope<'_>, instance: Instance) -> StoreOutcome {
        let mut slots = self.slots.lock();
        match slots.entry(scope.level) {
            std::collections::hash_map::Entry::Occupied(existing) => StoreOutcome {
                instance: existing.get().clone(),
                newly_stored: false,
                owner: StoreOwner::None,
            },
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(instance.clone());
                StoreOutcome {
                    instance,
                    newly_stored: true,
                    owner: StoreOwner::Level,
                }
            }
        }
    }
    fn evict_level(&self, level: u64) {
        self.slots.lock().remove(&level);
    }
}

/// Shared within one top-level resolve, gone afterwards
#[derive(Default)]
pub struct PerResolve {
    claim: Claim,
}
impl PerResolve {
    pub fn new() -> Self {
        Self::default()
    }
}
impl LifetimeManager for PerResolve {
    fn name(&self) -> &'static str {
        "per-resolve"
    }
    fn claim(&self) -> bool {
        self.claim.take()
    }
    fn get(&self, scope: &mut LifetimeScope<'_>) -> Option<Instance> {
        scope.per_resolve.get(scope.key).cloned()
    }
    fn store(&self, scope: &mut LifetimeScope<'_>, instance: Instance) -> StoreOutcome {
        scope
            .per_resolve
            .entry(scope.key.clone())
            .or_insert_with(|| instance.clone());
        StoreOutcome::passthrough(instance)
    }
}

/// Tracks an instance without extending its lifetime.
///
/// Typed by the registered surface type so the weak reference follows the
/// caller-visible allocation, not the container's erasure wrapper.
pub struct ExternallyControlled<T: Injectable + ?Sized> {
    claim: Claim,
    slot: Mutex<Option<std::sync::Weak<T>>>,
}
impl<T: Injectable + ?Sized> Default for ExternallyControlled<T> {
    fn default() -> Self {
        ExternallyControlled {
            claim: Claim::default(),
            slot: Mutex::new(None),
        }
    }
}
impl<T: Injectable + ?Sized> ExternallyControlled<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn remember(&self, instance: &Instance) {
        if let Ok(strong) = instance.downcast::<T>() {
            *self.slot.lock() = Some(std::sync::Arc::downgrade(&strong));
        }
    }
}
impl<T: Injectable + ?Sized> LifetimeManager for ExternallyControlled<T> {
    fn name(&self) -> &'static str {
        "externally-controlled"
    }
    fn claim(&self) -> bool {
        self.claim.take()
    }
    fn get(&self, _scope: &mut LifetimeScope<'_>) -> Option<Instance> {
        self.slot
            .lock()
            .as_ref()
            .and_then(std::sync::Weak::upgrade)
            .map(Instance::new)
    }
    fn store(&self, _scope: &mut LifetimeScope<'_>, instance: Instance) -> StoreOutcome {
        self.remember(&instance);
        StoreOutcome::passthrough(instance)
    }
    fn seed(&self, _level: u64, instance: Instance) -> Option<StoreOwner> {
        self.remember(&instance);
        Some(StoreOwner::None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn scope<'a>(
        level: u64,
        key: &'a BuildKey,
        per_resolve: &'a mut HashMap<BuildKey, Instance>,
    ) -> LifetimeScope<'a> {
        LifetimeScope {
            level,
            key,
            per_resolve,
        }
    }

    #[test]
    fn claim_succeeds_once() {
        let manager = ContainerControlled::new();
        assert!(manager.claim());
        assert!(!manager.claim());
    }

    #[test]
    fn container_controlled_keeps_the_winner() {
        let manager = ContainerControlled::new();
        let key = BuildKey::of::<u32>();
        let mut map = HashMap::new();

        let first = manager
            .store(&mut scope(1, &key, &mut map), Instance::new(Arc::new(1_u32)));
        assert!(first.newly_stored);
        assert_eq!(first.owner, StoreOwner::Registration);

        let second = manager
            .store(&mut scope(2, &key, &mut map), Instance::new(Arc::new(2_u32)));
        assert!(!second.newly_stored);
        assert!(first.instance.ptr_eq(&second.instance));
        assert_eq!(*second.instance.downcast::<u32>().unwrap(), 1);
    }

    #[test]
    fn container_controlled_race_produces_one_canonical_instance() {
        let manager = Arc::new(ContainerControlled::new());
        let mut handles = Vec::new();
        for i in 0..8_u32 {
            let manager = manager.clone();
            handles.push(std::thread::spawn(move || {
                let key = BuildKey::of::<u32>();
                let mut map = HashMap::new();
                let outcome = manager.store(
                    &mut scope(1, &key, &mut map),
                    Instance::new(Arc::new(i)),
                );
                *outcome.instance.downcast::<u32>().unwrap()
            }));
        }
        let values: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(values.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn hierarchical_caches_per_level() {
        let manager = Hierarchical::new();
        let key = BuildKey::of::<u32>();
        let mut map = HashMap::new();

        manager.store(&mut scope(1, &key, &mut map), Instance::new(Arc::new(10_u32)));
        manager.store(&mut scope(2, &key, &mut map), Instance::new(Arc::new(20_u32)));

        let one = manager.get(&mut scope(1, &key, &mut map)).unwrap();
        let two = manager.get(&mut scope(2, &key, &mut map)).unwrap();
        assert_eq!(*one.downcast::<u32>().unwrap(), 10);
        assert_eq!(*two.downcast::<u32>().unwrap(), 20);

        manager.evict_level(1);
        assert!(manager.get(&mut scope(1, &key, &mut map)).is_none());
        assert!(manager.get(&mut scope(2, &key, &mut map)).is_some());
    }

    #[test]
    fn per_resolve_lives_in_the_call_cache() {
        let manager = PerResolve::new();
        let key = BuildKey::of::<u32>();

        let mut first_call = HashMap::new();
        manager.store(
            &mut scope(1, &key, &mut first_call),
            Instance::new(Arc::new(7_u32)),
        );
        assert!(manager.get(&mut scope(1, &key, &mut first_call)).is_some());

        let mut second_call = HashMap::new();
        assert!(manager.get(&mut scope(1, &key, &mut second_call)).is_none());
    }

    #[test]
    fn externally_controlled_does_not_keep_alive() {
        let manager = ExternallyControlled::<String>::new();
        let key = BuildKey::of::<String>();
        let mut map = HashMap::new();

        let external = Arc::new("here".to_string());
        manager.store(&mut scope(1, &key, &mut map), Instance::new(external.clone()));
        let served = manager.get(&mut scope(1, &key, &mut map)).unwrap();
        let served = served.downcast::<String>().unwrap();
        assert!(Arc::ptr_eq(&external, &served));

        drop(external);
        drop(served);
        assert!(manager.get(&mut scope(1, &key, &mut map)).is_none());
    }
}
