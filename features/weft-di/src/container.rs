//! The container hierarchy and its public resolve surface.
//!
//! A [Container] is a cheap-clone handle. Children share no registrations
//! with their parent but inherit policy lookup through the parent pointer;
//! disposing a parent disposes every child first, disposing a child never
//! touches the parent.

use std::{
    any::TypeId,
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::{Mutex, RwLock};

use crate::{
    deferred::{Deferred, DeferredHandle, DeferredTarget},
    descriptor::{
        erase_apply, erase_construct, ArgList, ConstructorSpec, DependencySpec, MethodSpec,
        PropertySpec, TypeDescriptor,
    },
    errors::{ConfigError, DisposeError, DisposeFailure, ResolveError},
    lifetimes::{ContainerControlled, LifetimeManager, Transient},
    messages,
    plan::{self, BuildPlan, PlanEnv},
    registry::{
        next_seq, CoerceFn, DecorateFn, DescriptorRegistry, DisposeFn, GenericBindFn,
        LifetimeFactory, MappedTarget, OpenGeneric, Registration, RegistrationKind, Registry,
    },
    strategies::{self, BuildContext, BuildStrategy},
    types::{BuildKey, DynError, GenericFamily, GenericShape, Injectable, Instance, TypeInfo},
};

static CONTAINER_ID: AtomicU64 = AtomicU64::new(0);

/// A container-controlled instance this level must dispose on teardown
struct OwnedEntry {
    instance: Instance,
    disposer: Option<DisposeFn>,
    manager: Arc<dyn LifetimeManager>,
    level: u64,
}

pub(crate) struct ContainerInner {
    id: u64,
    parent: Option<Container>,
    children: Mutex<Vec<Weak<ContainerInner>>>,
    registry: Registry,
    descriptors: DescriptorRegistry,
    plans: RwLock<HashMap<BuildKey, Arc<PlanCacheEntry>>>,
    owned: Mutex<Vec<OwnedEntry>>,
    strategies: Arc<[Box<dyn BuildStrategy>]>,
    disposed: AtomicBool,
}

struct PlanCacheEntry {
    /// Seq of the registration the plan was compiled from, or
    /// [FALLBACK_SEQ] for descriptor-fallback plans
    seq: u64,
    plan: Arc<BuildPlan>,
}

const FALLBACK_SEQ: u64 = u64::MAX;

/// Handle to one level of the container hierarchy
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

/// Non-owning container handle, used by deferred values
#[derive(Clone)]
pub struct WeakContainer(Weak<ContainerInner>);

impl WeakContainer {
    pub(crate) fn upgrade(&self) -> Result<Container, ResolveError> {
        match self.0.upgrade() {
            Some(inner) if !inner.disposed.load(Ordering::Acquire) => {
                Ok(Container { inner })
            }
            _ => Err(ResolveError::ContainerDisposed),
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("registrations", &self.inner.registry.snapshot().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Container {
    pub fn new() -> Container {
        Container {
            inner: Arc::new(ContainerInner {
                id: CONTAINER_ID.fetch_add(1, Ordering::Relaxed),
                parent: None,
                children: Mutex::new(Vec::new()),
                registry: Registry::new(),
                descriptors: DescriptorRegistry::new(),
                plans: RwLock::new(HashMap::new()),
                owned: Mutex::new(Vec::new()),
                strategies: strategies::default_chain(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// New child level: no shared registrations, policy lookup through the
    /// parent pointer only
    pub fn create_child(&self) -> Container {
        let child = Container {
            inner: Arc::new(ContainerInner {
                id: CONTAINER_ID.fetch_add(1, Ordering::Relaxed),
                parent: Some(self.clone()),
                children: Mutex::new(Vec::new()),
                registry: Registry::new(),
                descriptors: DescriptorRegistry::new(),
                plans: RwLock::new(HashMap::new()),
                owned: Mutex::new(Vec::new()),
                strategies: self.inner.strategies.clone(),
                disposed: AtomicBool::new(false),
            }),
        };
        self.inner
            .children
            .lock()
            .push(Arc::downgrade(&child.inner));
        tracing::debug!(parent = self.inner.id, child = child.inner.id, "created child container");
        child
    }

    // ── Registration ──

    pub fn register<T: Injectable + ?Sized>(&self) -> RegistrationBuilder<'_, T> {
        RegistrationBuilder {
            container: self,
            name: None,
            lifetime: None,
            mapped: None,
            constructors: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            seeded: None,
            disposer: None,
            decorators: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Make a descriptor known at this level; the self-registration
    /// fallback and mapped registrations draw from here
    pub fn register_descriptor(&self, descriptor: TypeDescriptor) {
        tracing::debug!(type_name = descriptor.info.type_name, "registered descriptor");
        self.inner.descriptors.insert(descriptor);
    }

    /// Register an unbound generic family.
    ///
    /// The binder produces the descriptor of the closed type for one
    /// argument list; each closed key gets its own lifetime manager from the
    /// factory. Arity mismatches surface at resolve time.
    pub fn register_open_generic(
        &self,
        family: GenericFamily,
        lifetime_factory: impl Fn() -> Arc<dyn LifetimeManager> + Send + Sync + 'static,
        bind: impl Fn(&crate::types::GenericArgs) -> Result<TypeDescriptor, String>
            + Send
            + Sync
            + 'static,
    ) {
        tracing::debug!(family = %family, "registered open generic");
        self.inner.registry.register_open(OpenGeneric {
            family,
            lifetime_factory: Arc::new(lifetime_factory) as LifetimeFactory,
            bind: Arc::new(bind) as GenericBindFn,
            disposer: None,
        });
    }

    /// Feed registrations from an external collaborator
    pub fn install(&self, source: &dyn RegistrationSource) -> Result<(), ConfigError> {
        source.apply(self)
    }

    /// Append a decorator to an existing registration.
    ///
    /// The decorator wraps every instance the registration produces from now
    /// on; the compiled plan for the key is invalidated. Returns false when
    /// the key is not registered at this level or any ancestor.
    pub fn decorate<T: Injectable + ?Sized>(
        &self,
        name: Option<&str>,
        decorate: impl Fn(Arc<T>) -> Arc<T> + Send + Sync + 'static,
    ) -> bool {
        let key = BuildKey::of::<T>().with_name(name.map(Arc::from));
        let decorator: DecorateFn = Arc::new(move |instance: Instance| {
            let target = instance
                .downcast::<T>()
                .map_err(|actual| -> DynError {
                    format!(
                        "decorator for '{}' received '{}'",
                        std::any::type_name::<T>(),
                        actual
                    )
                    .into()
                })?;
            Ok(Instance::new(decorate(target)))
        });

        let mut current = Some(self.clone());
        while let Some(container) = current {
            let amended = container.inner.registry.amend(&key, |registration| {
                let mut amended = registration.clone();
                amended.decorators.push(decorator.clone());
                amended.seq = next_seq();
                amended
            });
            if amended {
                container.invalidate_plan(&key);
                return true;
            }
            current = container.inner.parent.clone();
        }
        false
    }

    // ── Resolution ──

    pub fn resolve<T: Injectable + ?Sized>(&self) -> Result<Arc<T>, ResolveError> {
        self.resolve_key_typed(&BuildKey::of::<T>())
    }

    pub fn resolve_named<T: Injectable + ?Sized>(
        &self,
        name: impl Into<Arc<str>>,
    ) -> Result<Arc<T>, ResolveError> {
        self.resolve_key_typed(&BuildKey::named::<T>(name))
    }

    /// Resolve a closed generic, eligible for open-generic matching
    pub fn resolve_generic<T: GenericShape + ?Sized>(&self) -> Result<Arc<T>, ResolveError> {
        self.resolve_key_typed(&BuildKey::generic::<T>())
    }

    /// Snapshot of every named registration of `T`, in registration order
    pub fn resolve_all<T: Injectable + ?Sized>(&self) -> Result<Vec<Arc<T>>, ResolveError> {
        let mut ctx = BuildContext::new();
        let instances = self.resolve_all_in_ctx(TypeInfo::of::<T>(), &mut ctx)?;
        instances
            .iter()
            .map(|instance| {
                instance
                    .downcast::<T>()
                    .map_err(|actual| ResolveError::TypeMismatch {
                        required: std::any::type_name::<T>(),
                        actual,
                    })
            })
            .collect()
    }

    /// A value performing a fresh `resolve` on every invoke
    pub fn deferred<T: Injectable + ?Sized>(&self) -> Deferred<T> {
        Deferred::from_handle(DeferredHandle {
            container: self.downgrade(),
            target: DeferredTarget::Key(BuildKey::of::<T>()),
        })
    }

    pub fn is_registered<T: Injectable + ?Sized>(&self, name: Option<&str>) -> bool {
        let key = BuildKey::of::<T>().with_name(name.map(Arc::from));
        let mut current = Some(self.clone());
        while let Some(container) = current {
            if container.inner.registry.contains(&key) {
                return true;
            }
            current = container.inner.parent.clone();
        }
        false
    }

    /// Diagnostic snapshot of this level's registrations
    pub fn registrations(&self) -> Vec<RegistrationInfo> {
        let mut infos: Vec<RegistrationInfo> = self
            .inner
            .registry
            .snapshot()
            .into_iter()
            .map(|registration| RegistrationInfo {
                key: registration.key.clone(),
                lifetime: registration.lifetime.name(),
                mapped_to: registration.mapped.as_ref().map(|mapped| mapped.info.type_name),
                seeded: !matches!(registration.kind, RegistrationKind::Constructed),
            })
            .collect();
        infos.sort_by_key(|info| info.key.info.type_name);
        infos
    }

    fn resolve_key_typed<T: Injectable + ?Sized>(
        &self,
        key: &BuildKey,
    ) -> Result<Arc<T>, ResolveError> {
        let instance = self.resolve_erased(key)?;
        instance
            .downcast::<T>()
            .map_err(|actual| ResolveError::TypeMismatch {
                required: std::any::type_name::<T>(),
                actual,
            })
    }

    pub(crate) fn resolve_erased(&self, key: &BuildKey) -> Result<Instance, ResolveError> {
        let mut ctx = BuildContext::new();
        let result = strategies::resolve_key(self, key, &mut ctx);
        if let Err(error) = &result {
            tracing::error!(key = %key, %error, hint = messages::hint_for(error), "resolve failed");
        }
        result
    }

    pub(crate) fn resolve_all_erased(&self, info: TypeInfo) -> Result<Vec<Instance>, ResolveError> {
        let mut ctx = BuildContext::new();
        self.resolve_all_in_ctx(info, &mut ctx)
    }

    pub(crate) fn resolve_all_in_ctx(
        &self,
        info: TypeInfo,
        ctx: &mut BuildContext,
    ) -> Result<Vec<Instance>, ResolveError> {
        let mut seen: HashSet<BuildKey> = HashSet::new();
        let mut matched: Vec<Arc<Registration>> = Vec::new();
        let mut current = Some(self.clone());
        while let Some(container) = current {
            for registration in container.inner.registry.named_for(info.type_id) {
                // Child registrations shadow the parent's for the same key
                if seen.insert(registration.key.clone()) {
                    matched.push(registration);
                }
            }
            current = container.inner.parent.clone();
        }
        matched.sort_by_key(|registration| registration.seq);

        matched
            .iter()
            .map(|registration| strategies::resolve_key(self, &registration.key, ctx))
            .collect()
    }

    // ── Engine support ──

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn downgrade(&self) -> WeakContainer {
        WeakContainer(Arc::downgrade(&self.inner))
    }

    pub(crate) fn strategies(&self) -> Arc<[Box<dyn BuildStrategy>]> {
        self.inner.strategies.clone()
    }

    /// Walk from this level to the root for the first registration of the
    /// key, binding open generics on the way
    pub(crate) fn locate(
        &self,
        key: &BuildKey,
    ) -> Result<Option<(Arc<Registration>, Container)>, ResolveError> {
        let mut current = Some(self.clone());
        while let Some(container) = current {
            if let Some(registration) = container.inner.registry.get(key) {
                return Ok(Some((registration, container)));
            }
            if let Some(registration) = container.inner.registry.bind_open(key)? {
                return Ok(Some((registration, container)));
            }
            current = container.inner.parent.clone();
        }
        Ok(None)
    }

    /// Cached compiled plan for the key, recompiled when the registration
    /// it was built from has been replaced
    pub(crate) fn plan_for(
        &self,
        key: &BuildKey,
        registration: Option<&Arc<Registration>>,
    ) -> Result<Arc<BuildPlan>, ResolveError> {
        let want = registration.map(|r| r.seq).unwrap_or(FALLBACK_SEQ);
        if let Some(entry) = self.inner.plans.read().get(key) {
            if entry.seq == want {
                return Ok(entry.plan.clone());
            }
        }

        let plan = Arc::new(plan::compile(key, registration.map(Arc::as_ref), self)?);
        self.inner.plans.write().insert(
            key.clone(),
            Arc::new(PlanCacheEntry {
                seq: want,
                plan: plan.clone(),
            }),
        );
        Ok(plan)
    }

    pub(crate) fn record_owned(
        &self,
        instance: Instance,
        disposer: Option<DisposeFn>,
        manager: Arc<dyn LifetimeManager>,
        level: u64,
    ) {
        self.inner.owned.lock().push(OwnedEntry {
            instance,
            disposer,
            manager,
            level,
        });
    }

    fn invalidate_plan(&self, key: &BuildKey) {
        self.inner.plans.write().remove(key);
    }

    fn descriptor_lookup(&self, type_id: TypeId) -> Option<Arc<TypeDescriptor>> {
        let mut current = Some(self.clone());
        while let Some(container) = current {
            if let Some(descriptor) = container.inner.descriptors.get(type_id) {
                return Some(descriptor);
            }
            current = container.inner.parent.clone();
        }
        None
    }

    // ── Teardown ──

    /// Dispose this level: children first, then every container-controlled
    /// instance this level owns, newest first. Idempotent; disposer failures
    /// are collected, never short-circuiting the rest.
    pub fn dispose(&self) -> Result<(), DisposeError> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(container = self.inner.id, "disposing container");

        let mut failures = Vec::new();

        let children: Vec<Weak<ContainerInner>> =
            self.inner.children.lock().drain(..).collect();
        for weak in children {
            if let Some(inner) = weak.upgrade() {
                let child = Container { inner };
                if let Err(error) = child.dispose() {
                    failures.extend(error.failures);
                }
            }
        }

        let owned: Vec<OwnedEntry> = self.inner.owned.lock().drain(..).collect();
        for entry in owned.into_iter().rev() {
            entry.manager.evict_level(entry.level);
            if let Some(disposer) = entry.disposer {
                if let Err(source) = disposer(&entry.instance) {
                    tracing::error!(
                        type_name = entry.instance.info.type_name,
                        %source,
                        "disposer failed"
                    );
                    failures.push(DisposeFailure {
                        type_name: entry.instance.info.type_name,
                        source,
                    });
                }
            }
        }

        self.inner.registry.clear();
        self.inner.plans.write().clear();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisposeError { failures })
        }
    }
}

impl PlanEnv for Container {
    fn descriptor_of(&self, type_id: TypeId) -> Option<Arc<TypeDescriptor>> {
        self.descriptor_lookup(type_id)
    }

    fn is_satisfiable(&self, spec: &DependencySpec) -> bool {
        match spec {
            DependencySpec::Key(key) => {
                let mut current = Some(self.clone());
                while let Some(container) = current {
                    if container.inner.registry.contains(key) {
                        return true;
                    }
                    if let Some(generic) = key.generic.as_deref() {
                        if container.inner.registry.has_open(generic.family.name) {
                            return true;
                        }
                    }
                    current = container.inner.parent.clone();
                }
                self.descriptor_lookup(key.info.type_id).is_some()
            }
            // Snapshots may be empty and deferred values resolve later
            DependencySpec::All(_)
            | DependencySpec::Deferred(_)
            | DependencySpec::DeferredAll(_) => true,
        }
    }
}

/// External collaborators (configuration loaders, scanners) feed the
/// container through this seam
pub trait RegistrationSource {
    fn apply(&self, container: &Container) -> Result<(), ConfigError>;
}

/// Diagnostic view of one registration
#[derive(Debug, Clone)]
pub struct RegistrationInfo {
    pub key: BuildKey,
    pub lifetime: &'static str,
    pub mapped_to: Option<&'static str>,
    pub seeded: bool,
}

/// Chainable registration, committed by [RegistrationBuilder::apply]
pub struct RegistrationBuilder<'c, T: Injectable + ?Sized> {
    container: &'c Container,
    name: Option<Arc<str>>,
    lifetime: Option<Arc<dyn LifetimeManager>>,
    mapped: Option<MappedTarget>,
    constructors: Vec<ConstructorSpec>,
    properties: Vec<PropertySpec>,
    methods: Vec<MethodSpec>,
    seeded: Option<Instance>,
    disposer: Option<DisposeFn>,
    decorators: Vec<DecorateFn>,
    _marker: std::marker::PhantomData<fn() -> Arc<T>>,
}

impl<'c, T: Injectable + ?Sized> RegistrationBuilder<'c, T> {
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn lifetime(mut self, manager: impl LifetimeManager + 'static) -> Self {
        self.lifetime = Some(Arc::new(manager));
        self
    }

    /// Attach an already shared lifetime manager. A manager instance serves
    /// at most one registration; reuse fails at [RegistrationBuilder::apply].
    pub fn lifetime_arc(mut self, manager: Arc<dyn LifetimeManager>) -> Self {
        self.lifetime = Some(manager);
        self
    }

    /// Map the registered key onto an implementation type.
    ///
    /// The coercion turns the built implementation into the registered
    /// surface type, e.g. `|c| c as Arc<dyn Logger>`.
    pub fn to<C: Injectable>(
        mut self,
        coerce: impl Fn(Arc<C>) -> Arc<T> + Send + Sync + 'static,
    ) -> Self {
        let erased: CoerceFn = Arc::new(move |instance: Instance| {
            let concrete = instance.downcast::<C>().map_err(|actual| -> DynError {
                format!(
                    "mapping expected '{}' but the constructor produced '{}'",
                    std::any::type_name::<C>(),
                    actual
                )
                .into()
            })?;
            Ok(Instance::new(coerce(concrete)))
        });
        self.mapped = Some(MappedTarget {
            info: TypeInfo::of::<C>(),
            coerce: erased,
        });
        self
    }

    /// Register a pre-built instance instead of a construction recipe
    pub fn instance(mut self, value: Arc<T>) -> Self {
        self.seeded = Some(Instance::new(value));
        self
    }

    pub fn with_dispose(
        mut self,
        dispose: impl Fn(&T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        let erased: DisposeFn = Arc::new(move |instance: &Instance| {
            let target = instance.downcast::<T>().map_err(|actual| -> DynError {
                format!(
                    "disposer for '{}' received '{}'",
                    std::any::type_name::<T>(),
                    actual
                )
                .into()
            })?;
            dispose(&target)
        });
        self.disposer = Some(erased);
        self
    }

    pub fn decorate(mut self, decorate: impl Fn(Arc<T>) -> Arc<T> + Send + Sync + 'static) -> Self {
        let erased: DecorateFn = Arc::new(move |instance: Instance| {
            let target = instance.downcast::<T>().map_err(|actual| -> DynError {
                format!(
                    "decorator for '{}' received '{}'",
                    std::any::type_name::<T>(),
                    actual
                )
                .into()
            })?;
            Ok(Instance::new(decorate(target)))
        });
        self.decorators.push(erased);
        self
    }

    pub fn apply(self) -> Result<(), ConfigError> {
        let key = BuildKey::of::<T>().with_name(self.name.clone());

        if let Some(instance) = self.seeded {
            let lifetime = self
                .lifetime
                .unwrap_or_else(|| Arc::new(ContainerControlled::new()));
            if !lifetime.claim() {
                return Err(ConfigError::LifetimeReused { key });
            }
            let kind = match lifetime.seed(self.container.id(), instance.clone()) {
                // The policy keeps the instance itself (weakly); the record
                // must not extend its lifetime
                Some(_) => RegistrationKind::SeededExternal,
                None => {
                    // The registering level owns the value and disposes it,
                    // resolved or not
                    self.container.record_owned(
                        instance.clone(),
                        self.disposer.clone(),
                        lifetime.clone(),
                        self.container.id(),
                    );
                    RegistrationKind::SeededValue(instance)
                }
            };

            tracing::debug!(key = %key, "registered instance");
            self.container.inner.registry.insert(Registration {
                key: key.clone(),
                mapped: None,
                lifetime,
                members: None,
                kind,
                disposer: self.disposer,
                decorators: self.decorators,
                seq: next_seq(),
            });
            self.container.invalidate_plan(&key);
            return Ok(());
        }

        let lifetime = self.lifetime.unwrap_or_else(|| Arc::new(Transient::new()));
        if !lifetime.claim() {
            return Err(ConfigError::LifetimeReused { key });
        }

        let members = if self.constructors.is_empty()
            && self.properties.is_empty()
            && self.methods.is_empty()
        {
            None
        } else {
            let info = self
                .mapped
                .as_ref()
                .map(|mapped| mapped.info)
                .unwrap_or(key.info);
            Some(Arc::new(TypeDescriptor {
                info,
                constructors: self.constructors,
                properties: self.properties,
                methods: self.methods,
            }))
        };

        tracing::debug!(key = %key, lifetime = lifetime.name(), "registered type");
        self.container.inner.registry.insert(Registration {
            key: key.clone(),
            mapped: self.mapped,
            lifetime,
            members,
            kind: RegistrationKind::Constructed,
            disposer: self.disposer,
            decorators: self.decorators,
            seq: next_seq(),
        });
        self.container.invalidate_plan(&key);
        Ok(())
    }
}

/// Explicit injection members, available for self-bound sized registrations
impl<'c, T: Injectable> RegistrationBuilder<'c, T> {
    /// The constructor to use for this registration, overriding selection
    pub fn use_constructor(
        mut self,
        params: Vec<DependencySpec>,
        build: impl Fn(&ArgList) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push(ConstructorSpec {
            params,
            marked: true,
            construct: erase_construct(build),
        });
        self
    }

    pub fn property(
        mut self,
        name: &'static str,
        param: DependencySpec,
        set: impl Fn(&T, &ArgList) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.properties.push(PropertySpec {
            name,
            param,
            apply: erase_apply(set),
        });
        self
    }

    pub fn method(
        mut self,
        name: &'static str,
        params: Vec<DependencySpec>,
        call: impl Fn(&T, &ArgList) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.methods.push(MethodSpec {
            name,
            params,
            apply: erase_apply(call),
        });
        self
    }
}
