//! Build plan compilation.
//!
//! A plan is the precompiled recipe for one build key: the selected
//! constructor with its parameter specs, the members to apply afterwards and
//! the policies attached to the registration. Plans are compiled once per
//! key, cached on the container level that owns the registration and thrown
//! away when that key is re-registered.

use std::{any::TypeId, sync::Arc};

use crate::{
    descriptor::{ConstructorSpec, DependencySpec, MethodSpec, PropertySpec, TypeDescriptor},
    errors::ConfigError,
    lifetimes::{LifetimeManager, Transient},
    registry::{CoerceFn, DecorateFn, DisposeFn, Registration, RegistrationKind},
    types::{BuildKey, Instance},
};

/// What the creation step does for this key
pub(crate) enum PlanKind {
    /// Run the selected constructor
    Construct(ConstructorSpec),
    /// Serve the registration's seeded value; decoration and lifetime
    /// caching still apply on first use
    SeededValue(Instance),
    /// A weakly held instance registration; the lifetime cache is the only
    /// source, an expired weak cannot be rebuilt
    SeededExternal,
}

pub(crate) struct BuildPlan {
    pub key: BuildKey,
    pub lifetime: Arc<dyn LifetimeManager>,
    pub kind: PlanKind,
    pub properties: Vec<PropertySpec>,
    pub methods: Vec<MethodSpec>,
    pub coerce: Option<CoerceFn>,
    pub decorators: Vec<DecorateFn>,
    pub disposer: Option<DisposeFn>,
}

impl std::fmt::Debug for BuildPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildPlan").field("key", &self.key).finish()
    }
}

/// What the compiler may ask the container hierarchy
pub(crate) trait PlanEnv {
    fn descriptor_of(&self, type_id: TypeId) -> Option<Arc<TypeDescriptor>>;
    /// Whether a parameter spec could be resolved with the present
    /// registrations and descriptors
    fn is_satisfiable(&self, spec: &DependencySpec) -> bool;
}

/// Compile the plan for a key.
///
/// Without a registration the key falls back onto its own descriptor with a
/// fresh transient lifetime; a key with neither registration nor descriptor
/// is not constructable.
pub(crate) fn compile(
    key: &BuildKey,
    registration: Option<&Registration>,
    env: &dyn PlanEnv,
) -> Result<BuildPlan, ConfigError> {
    if let Some(registration) = registration {
        match &registration.kind {
            RegistrationKind::SeededValue(instance) => {
                return Ok(BuildPlan {
                    key: key.clone(),
                    lifetime: registration.lifetime.clone(),
                    kind: PlanKind::SeededValue(instance.clone()),
                    properties: Vec::new(),
                    methods: Vec::new(),
                    coerce: None,
                    decorators: registration.decorators.clone(),
                    disposer: registration.disposer.clone(),
                });
            }
            RegistrationKind::SeededExternal => {
                return Ok(BuildPlan {
                    key: key.clone(),
                    lifetime: registration.lifetime.clone(),
                    kind: PlanKind::SeededExternal,
                    properties: Vec::new(),
                    methods: Vec::new(),
                    coerce: None,
                    decorators: registration.decorators.clone(),
                    disposer: registration.disposer.clone(),
                });
            }
            RegistrationKind::Constructed => {}
        }

        let target = registration
            .mapped
            .as_ref()
            .map(|mapped| mapped.info)
            .unwrap_or(key.info);
        let descriptor = match &registration.members {
            Some(members) => members.clone(),
            None => env
                .descriptor_of(target.type_id)
                .ok_or(ConfigError::NotConstructable {
                    key: BuildKey {
                        info: target,
                        name: key.name.clone(),
                        generic: None,
                    },
                })?,
        };

        let constructor = select_constructor(key, &descriptor, env)?;
        Ok(BuildPlan {
            key: key.clone(),
            lifetime: registration.lifetime.clone(),
            kind: PlanKind::Construct(constructor),
            properties: descriptor.properties.clone(),
            methods: descriptor.methods.clone(),
            coerce: registration.mapped.as_ref().map(|mapped| mapped.coerce.clone()),
            decorators: registration.decorators.clone(),
            disposer: registration.disposer.clone(),
        })
    } else {
        // Self-registration fallback: the descriptor stands in for the
        // missing registration, with transient semantics
        let descriptor =
            env.descriptor_of(key.info.type_id)
                .ok_or(ConfigError::NotConstructable { key: key.clone() })?;
        let constructor = select_constructor(key, &descriptor, env)?;
        let lifetime = Arc::new(Transient::new());
        lifetime.claim();
        Ok(BuildPlan {
            key: key.clone(),
            lifetime,
            kind: PlanKind::Construct(constructor),
            properties: descriptor.properties.clone(),
            methods: descriptor.methods.clone(),
            coerce: None,
            decorators: Vec::new(),
            disposer: None,
        })
    }
}

/// Constructor selection.
///
/// A single marked constructor wins outright. Otherwise the candidate with
/// the most parameters whose specs are all satisfiable wins; a tie at the
/// winning count is ambiguous.
fn select_constructor(
    key: &BuildKey,
    descriptor: &TypeDescriptor,
    env: &dyn PlanEnv,
) -> Result<ConstructorSpec, ConfigError> {
    let marked: Vec<&ConstructorSpec> = descriptor
        .constructors
        .iter()
        .filter(|ctor| ctor.marked)
        .collect();
    match marked.len() {
        1 => return Ok(marked[0].clone()),
        0 => {}
        _ => {
            return Err(ConfigError::AmbiguousConstructor {
                key: key.clone(),
                detail: "more than one constructor is marked for injection",
            })
        }
    }

    if descriptor.constructors.is_empty() {
        return Err(ConfigError::NoUsableConstructor {
            key: key.clone(),
            detail: "the descriptor declares no constructors",
        });
    }

    let mut counts: Vec<usize> = descriptor
        .constructors
        .iter()
        .map(|ctor| ctor.params.len())
        .collect();
    counts.sort_unstable_by(|a, b| b.cmp(a));
    counts.dedup();

    for count in counts {
        let satisfiable: Vec<&ConstructorSpec> = descriptor
            .constructors
            .iter()
            .filter(|ctor| ctor.params.len() == count)
            .filter(|ctor| ctor.params.iter().all(|spec| env.is_satisfiable(spec)))
            .collect();
        match satisfiable.len() {
            0 => continue,
            1 => return Ok(satisfiable[0].clone()),
            _ => {
                return Err(ConfigError::AmbiguousConstructor {
                    key: key.clone(),
                    detail: "several constructors tie at the same parameter count",
                })
            }
        }
    }

    Err(ConfigError::NoUsableConstructor {
        key: key.clone(),
        detail: "no constructor has fully resolvable parameters",
    })
}
