//! Weft DI builds fully wired object graphs: ask for a type (optionally by
//! name) and the container constructs it, resolves its dependencies
//! recursively, honors each registration's lifetime policy and hands back a
//! finished instance.
//!
//! The crate is split into the following components:
//!
//! 1. Container - the hierarchy of registration levels and the resolve
//!    surface ([container::Container])
//! 2. Registry - the per-level registration store with open-generic support
//! 3. Descriptors - explicit construction recipes replacing runtime
//!    reflection ([descriptor::TypeDescriptor])
//! 4. Plans - compiled, cached build recipes per (type, name)
//! 5. Strategies - the pre/post build chain executing plans
//! 6. Lifetimes - pluggable instance caching policies ([lifetimes])
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_di::{Container, ContainerControlled, DependencySpec, TypeDescriptor};
//!
//! struct Config {
//!     url: String,
//! }
//! struct Client {
//!     config: Arc<Config>,
//! }
//!
//! fn wire() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Container::new();
//!     container
//!         .register::<Config>()
//!         .instance(Arc::new(Config { url: "localhost".into() }))
//!         .apply()?;
//!     container.register_descriptor(
//!         TypeDescriptor::describe::<Client>()
//!             .constructor(vec![DependencySpec::of::<Config>()], |args| {
//!                 Ok(Client { config: args.get::<Config>(0)? })
//!             })
//!             .build(),
//!     );
//!     container
//!         .register::<Client>()
//!         .lifetime(ContainerControlled::new())
//!         .apply()?;
//!
//!     let client = container.resolve::<Client>()?;
//!     assert_eq!(client.config.url, "localhost");
//!     Ok(())
//! }
//! # wire().unwrap();
//! ```

pub mod container;
pub mod deferred;
pub mod descriptor;
pub mod errors;
pub mod lifetimes;
pub mod messages;
mod plan;
mod registry;
mod strategies;
pub mod types;

pub use container::{
    Container, RegistrationBuilder, RegistrationInfo, RegistrationSource, WeakContainer,
};
pub use deferred::{Deferred, DeferredAll};
pub use descriptor::{ArgList, DependencySpec, DescriptorBuilder, TypeDescriptor};
pub use errors::{ConfigError, DisposeError, DisposeFailure, ResolveError};
pub use lifetimes::{
    ContainerControlled, ExternallyControlled, Hierarchical, LifetimeManager, LifetimeScope,
    PerResolve, StoreOutcome, StoreOwner, Transient,
};
pub use types::{BuildKey, DynError, GenericArgs, GenericFamily, GenericShape, Injectable, Instance, TypeInfo};
