//! The build engine: an ordered strategy chain over a mutable context.
//!
//! Every build key runs through the same chain. Pre-build steps execute
//! top-to-bottom and may short-circuit the construction by filling the
//! frame's `existing` slot; post-build steps execute bottom-to-top and see
//! the finished instance. The chain is:
//!
//! 1. [LifetimeStrategy] - pre: serve from cache; post: store new instances
//! 2. [CreationStrategy] - pre: run the compiled plan's constructor
//! 3. [InitializerStrategy] - post: property and method injection, then
//!    decoration

use std::{collections::HashMap, sync::Arc};

use crate::{
    container::Container,
    deferred::{DeferredHandle, DeferredTarget},
    descriptor::{ArgList, DependencySpec, ResolvedArg},
    errors::ResolveError,
    lifetimes::{LifetimeScope, StoreOwner},
    plan::{BuildPlan, PlanKind},
    types::{BuildKey, Instance},
};

/// Request-scoped state shared by every frame of one top-level resolve
pub(crate) struct BuildContext {
    /// Keys currently being built, used as the recursion guard
    pub in_progress: Vec<BuildKey>,
    /// Cache backing the per-resolve lifetime
    pub per_resolve: HashMap<BuildKey, Instance>,
}

impl BuildContext {
    pub fn new() -> Self {
        BuildContext {
            in_progress: Vec::new(),
            per_resolve: HashMap::new(),
        }
    }
}

/// Mutable state of one build key's trip through the chain
pub(crate) struct BuildFrame<'a> {
    pub key: &'a BuildKey,
    pub plan: &'a BuildPlan,
    /// Container the resolve was issued on; dependencies resolve through it
    pub origin: &'a Container,
    /// Container the registration lives on; owns container-controlled state
    pub home: &'a Container,
    pub ctx: &'a mut BuildContext,
    pub existing: Option<Instance>,
    pub newly_built: bool,
}

pub(crate) trait BuildStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn pre_build(&self, frame: &mut BuildFrame<'_>) -> Result<(), ResolveError> {
        let _ = frame;
        Ok(())
    }

    fn post_build(&self, frame: &mut BuildFrame<'_>) -> Result<(), ResolveError> {
        let _ = frame;
        Ok(())
    }
}

pub(crate) fn default_chain() -> Arc<[Box<dyn BuildStrategy>]> {
    let chain: Vec<Box<dyn BuildStrategy>> = vec![
        Box::new(LifetimeStrategy),
        Box::new(CreationStrategy),
        Box::new(InitializerStrategy),
    ];
    Arc::from(chain)
}

/// Resolve one build key within an ongoing context.
///
/// This is the recursion point: constructor parameters re-enter here with
/// the same context, which is what makes the guard catch cycles.
pub(crate) fn resolve_key(
    origin: &Container,
    key: &BuildKey,
    ctx: &mut BuildContext,
) -> Result<Instance, ResolveError> {
    if origin.is_disposed() {
        return Err(ResolveError::ContainerDisposed);
    }
    if ctx.in_progress.contains(key) {
        let mut chain = ctx.in_progress.clone();
        chain.push(key.clone());
        return Err(ResolveError::DependencyCycle { chain });
    }

    ctx.in_progress.push(key.clone());
    let result = build_once(origin, key, ctx);
    ctx.in_progress.pop();
    result
}

fn build_once(
    origin: &Container,
    key: &BuildKey,
    ctx: &mut BuildContext,
) -> Result<Instance, ResolveError> {
    let located = origin.locate(key)?;
    let (plan, home) = match located {
        Some((registration, home)) => (origin.plan_for(key, Some(&registration))?, home),
        None => (origin.plan_for(key, None)?, origin.clone()),
    };

    let strategies = origin.strategies();
    let mut frame = BuildFrame {
        key,
        plan: &plan,
        origin,
        home: &home,
        ctx,
        existing: None,
        newly_built: false,
    };

    for (index, strategy) in strategies.iter().enumerate() {
        strategy.pre_build(&mut frame).map_err(|source| wrap(key, strategy.name(), index, source))?;
    }
    for (index, strategy) in strategies.iter().enumerate().rev() {
        strategy.post_build(&mut frame).map_err(|source| wrap(key, strategy.name(), index, source))?;
    }

    match frame.existing {
        Some(instance) => Ok(instance),
        // The chain ran to completion without producing anything; creation
        // treats that as its own failure, so this is unreachable in the
        // shipped chain but kept as a defensive contract for custom chains
        None => Err(ResolveError::Construction {
            key: key.clone(),
            source: "the strategy chain produced no instance".into(),
        }),
    }
}

fn wrap(key: &BuildKey, strategy: &'static str, index: usize, source: ResolveError) -> ResolveError {
    ResolveError::BuildFailed {
        key: key.clone(),
        strategy,
        index,
        source: Box::new(source),
    }
}

/// Resolve the arguments of one constructor or member call
fn resolve_args(
    origin: &Container,
    specs: &[DependencySpec],
    ctx: &mut BuildContext,
) -> Result<ArgList, ResolveError> {
    let mut values = Vec::with_capacity(specs.len());
    for spec in specs {
        let value = match spec {
            DependencySpec::Key(key) => ResolvedArg::One(resolve_key(origin, key, ctx)?),
            DependencySpec::All(info) => {
                ResolvedArg::All(origin.resolve_all_in_ctx(*info, ctx)?)
            }
            DependencySpec::Deferred(key) => ResolvedArg::Deferred(DeferredHandle {
                container: origin.downgrade(),
                target: DeferredTarget::Key(key.clone()),
            }),
            DependencySpec::DeferredAll(info) => ResolvedArg::DeferredAll(DeferredHandle {
                container: origin.downgrade(),
                target: DeferredTarget::All(*info),
            }),
        };
        values.push(value);
    }
    Ok(ArgList::new(values))
}

/// Serves cached instances before construction, stores new ones after
struct LifetimeStrategy;
impl BuildStrategy for LifetimeStrategy {
    fn name(&self) -> &'static str {
        "lifetime"
    }

    fn pre_build(&self, frame: &mut BuildFrame<'_>) -> Result<(), ResolveError> {
        if frame.existing.is_some() {
            return Ok(());
        }
        let mut scope = LifetimeScope {
            level: frame.origin.id(),
            key: frame.key,
            per_resolve: &mut frame.ctx.per_resolve,
        };
        if let Some(cached) = frame.plan.lifetime.get(&mut scope) {
            tracing::debug!(key = %frame.key, "served from {} cache", frame.plan.lifetime.name());
            frame.existing = Some(cached);
        }
        Ok(())
    }

    fn post_build(&self, frame: &mut BuildFrame<'_>) -> Result<(), ResolveError> {
        if !frame.newly_built {
            return Ok(());
        }
        let Some(instance) = frame.existing.clone() else {
            return Ok(());
        };

        let mut scope = LifetimeScope {
            level: frame.origin.id(),
            key: frame.key,
            per_resolve: &mut frame.ctx.per_resolve,
        };
        let outcome = frame.plan.lifetime.store(&mut scope, instance);
        // Seeded values are owned by their registering container since
        // registration time; storing them again must not double-dispose
        let seeded = matches!(frame.plan.kind, PlanKind::SeededValue(_));
        if outcome.newly_stored && !seeded {
            match outcome.owner {
                StoreOwner::Registration => frame.home.record_owned(
                    outcome.instance.clone(),
                    frame.plan.disposer.clone(),
                    frame.plan.lifetime.clone(),
                    frame.home.id(),
                ),
                StoreOwner::Level => frame.origin.record_owned(
                    outcome.instance.clone(),
                    frame.plan.disposer.clone(),
                    frame.plan.lifetime.clone(),
                    frame.origin.id(),
                ),
                StoreOwner::None => {}
            }
        }
        // Losers of a concurrent first-resolve leave with the winner's
        // instance here
        frame.existing = Some(outcome.instance);
        Ok(())
    }
}

/// Runs the compiled plan's constructor when nothing was cached
struct CreationStrategy;
impl BuildStrategy for CreationStrategy {
    fn name(&self) -> &'static str {
        "creation"
    }

    fn pre_build(&self, frame: &mut BuildFrame<'_>) -> Result<(), ResolveError> {
        if frame.existing.is_some() {
            return Ok(());
        }
        match &frame.plan.kind {
            PlanKind::SeededValue(instance) => {
                frame.existing = Some(instance.clone());
                frame.newly_built = true;
                Ok(())
            }
            PlanKind::SeededExternal => Err(ResolveError::InstanceExpired {
                key: frame.key.clone(),
            }),
            PlanKind::Construct(constructor) => {
                let args = resolve_args(frame.origin, &constructor.params, frame.ctx)?;
                let built =
                    (constructor.construct)(&args).map_err(|source| ResolveError::Construction {
                        key: frame.key.clone(),
                        source,
                    })?;
                let built = match &frame.plan.coerce {
                    Some(coerce) => {
                        coerce(built).map_err(|source| ResolveError::Construction {
                            key: frame.key.clone(),
                            source,
                        })?
                    }
                    None => built,
                };
                tracing::debug!(key = %frame.key, "constructed instance");
                frame.existing = Some(built);
                frame.newly_built = true;
                Ok(())
            }
        }
    }
}

/// Applies property setters, method calls and decorators to new instances
struct InitializerStrategy;
impl BuildStrategy for InitializerStrategy {
    fn name(&self) -> &'static str {
        "initializer"
    }

    fn post_build(&self, frame: &mut BuildFrame<'_>) -> Result<(), ResolveError> {
        if !frame.newly_built {
            return Ok(());
        }
        let Some(mut instance) = frame.existing.clone() else {
            return Ok(());
        };

        for property in &frame.plan.properties {
            let args = resolve_args(
                frame.origin,
                std::slice::from_ref(&property.param),
                frame.ctx,
            )?;
            (property.apply)(&instance, &args).map_err(|source| ResolveError::Construction {
                key: frame.key.clone(),
                source,
            })?;
        }
        for method in &frame.plan.methods {
            let args = resolve_args(frame.origin, &method.params, frame.ctx)?;
            (method.apply)(&instance, &args).map_err(|source| ResolveError::Construction {
                key: frame.key.clone(),
                source,
            })?;
        }

        // Decoration runs last so the lifetime cache stores the wrapped
        // instance, not the bare target
        for decorate in &frame.plan.decorators {
            instance = decorate(instance).map_err(|source| ResolveError::Construction {
                key: frame.key.clone(),
                source,
            })?;
        }
        frame.existing = Some(instance);
        Ok(())
    }
}
