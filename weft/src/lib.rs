//! Weft wires object graphs and intercepts their method calls.
//!
//! This facade re-exports the two feature crates:
//!
//! 1. [weft_di] - the inversion-of-control container: registrations,
//!    lifetimes, build plans and the container hierarchy
//! 2. [weft_intercept] - the call-interception pipeline: matching rules,
//!    ordered call handlers and proxy support
//!
//! Depend on this crate for the whole stack, or on the feature crates
//! individually.

pub use weft_di as di;
pub use weft_intercept as intercept;

pub use weft_di::{
    ArgList, BuildKey, ConfigError, Container, ContainerControlled, Deferred, DeferredAll,
    DependencySpec, DisposeError, DynError, ExternallyControlled, GenericArgs, GenericFamily,
    GenericShape, Hierarchical, Injectable, Instance, LifetimeManager, PerResolve,
    RegistrationBuilder, RegistrationInfo, RegistrationSource, ResolveError, Transient,
    TypeDescriptor, TypeInfo,
};
pub use weft_intercept::{
    intercept, returns, take_return, AnyRule, ArgBag, CallHandler, CallReturn, InterceptError,
    InterceptionPolicy, MatchingRule, Mechanism, MemberNameRule, MethodCall, MethodProfile, Next,
    PipelineSet, PrefixRule,
};
