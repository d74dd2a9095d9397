//! Explicit type descriptors.
//!
//! The container performs no runtime reflection. Everything it needs to
//! construct a type is declared up front as a descriptor:
//!
//! 1. Constructors, each with its ordered parameter dependency specs
//! 2. Properties to set on the freshly built instance
//! 3. Methods to call after property injection
//!
//! The erased closures inside a descriptor receive an [ArgList] with the
//! already-resolved dependencies and hand typed values back out through its
//! accessors.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    deferred::{Deferred, DeferredAll, DeferredHandle},
    types::{BuildKey, DynError, GenericShape, Injectable, Instance, TypeInfo},
};

/// How one dependency of a constructor, property or method is requested
#[derive(Clone, Debug)]
pub enum DependencySpec {
    /// Resolve a single instance for the key
    Key(BuildKey),
    /// Snapshot of every named registration of the element type, in
    /// registration order
    All(TypeInfo),
    /// A value that performs a fresh resolve of the key on every invoke
    Deferred(BuildKey),
    /// A value that performs a fresh resolve-all on every invoke
    DeferredAll(TypeInfo),
}

impl DependencySpec {
    pub fn of<T: 'static + ?Sized>() -> Self {
        DependencySpec::Key(BuildKey::of::<T>())
    }

    pub fn named<T: 'static + ?Sized>(name: impl Into<Arc<str>>) -> Self {
        DependencySpec::Key(BuildKey::named::<T>(name))
    }

    pub fn generic<T: GenericShape + ?Sized>() -> Self {
        DependencySpec::Key(BuildKey::generic::<T>())
    }

    pub fn all<T: 'static + ?Sized>() -> Self {
        DependencySpec::All(TypeInfo::of::<T>())
    }

    pub fn deferred<T: 'static + ?Sized>() -> Self {
        DependencySpec::Deferred(BuildKey::of::<T>())
    }

    pub fn deferred_named<T: 'static + ?Sized>(name: impl Into<Arc<str>>) -> Self {
        DependencySpec::Deferred(BuildKey::named::<T>(name))
    }

    pub fn deferred_all<T: 'static + ?Sized>() -> Self {
        DependencySpec::DeferredAll(TypeInfo::of::<T>())
    }
}

/// One dependency after resolution, still type-erased
#[derive(Clone)]
pub enum ResolvedArg {
    One(Instance),
    All(Vec<Instance>),
    Deferred(DeferredHandle),
    DeferredAll(DeferredHandle),
}

#[derive(Error, Debug)]
enum ArgError {
    #[error("argument {index} out of range ({len} resolved)")]
    OutOfRange { index: usize, len: usize },
    #[error("argument {index} is not the requested shape ({requested})")]
    WrongShape {
        index: usize,
        requested: &'static str,
    },
    #[error("argument {index}: required '{required}' but the instance is '{actual}'")]
    Downcast {
        index: usize,
        required: &'static str,
        actual: &'static str,
    },
    #[error("the member target is not a '{required}' (the instance is '{actual}')")]
    Target {
        required: &'static str,
        actual: &'static str,
    },
}

/// The resolved dependencies of one constructor or member call
pub struct ArgList {
    values: Vec<ResolvedArg>,
}

impl ArgList {
    pub(crate) fn new(values: Vec<ResolvedArg>) -> Self {
        ArgList { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&ResolvedArg, ArgError> {
        self.values.get(index).ok_or(ArgError::OutOfRange {
            index,
            len: self.values.len(),
        })
    }

    pub fn get<T: Injectable + ?Sized>(&self, index: usize) -> Result<Arc<T>, DynError> {
        match self.slot(index)? {
            ResolvedArg::One(instance) => {
                instance.downcast::<T>().map_err(|actual| {
                    ArgError::Downcast {
                        index,
                        required: std::any::type_name::<T>(),
                        actual,
                    }
                    .into()
                })
            }
            _ => Err(ArgError::WrongShape {
                index,
                requested: "single instance",
            }
            .into()),
        }
    }

    pub fn get_all<T: Injectable + ?Sized>(&self, index: usize) -> Result<Vec<Arc<T>>, DynError> {
        match self.slot(index)? {
            ResolvedArg::All(instances) => instances
                .iter()
                .map(|instance| {
                    instance.downcast::<T>().map_err(|actual| {
                        ArgError::Downcast {
                            index,
                            required: std::any::type_name::<T>(),
                            actual,
                        }
                        .into()
                    })
                })
                .collect(),
            _ => Err(ArgError::WrongShape {
                index,
                requested: "instance snapshot",
            }
            .into()),
        }
    }

    pub fn get_deferred<T: Injectable + ?Sized>(&self, index: usize) -> Result<Deferred<T>, DynError> {
        match self.slot(index)? {
            ResolvedArg::Deferred(handle) => Ok(Deferred::from_handle(handle.clone())),
            _ => Err(ArgError::WrongShape {
                index,
                requested: "deferred resolve",
            }
            .into()),
        }
    }

    pub fn get_deferred_all<T: Injectable + ?Sized>(
        &self,
        index: usize,
    ) -> Result<DeferredAll<T>, DynError> {
        match self.slot(index)? {
            ResolvedArg::DeferredAll(handle) => Ok(DeferredAll::from_handle(handle.clone())),
            _ => Err(ArgError::WrongShape {
                index,
                requested: "deferred resolve-all",
            }
            .into()),
        }
    }
}

pub(crate) type ConstructFn = Arc<dyn Fn(&ArgList) -> Result<Instance, DynError> + Send + Sync>;
pub(crate) type ApplyFn = Arc<dyn Fn(&Instance, &ArgList) -> Result<(), DynError> + Send + Sync>;

/// One way to construct the described type
#[derive(Clone)]
pub struct ConstructorSpec {
    pub params: Vec<DependencySpec>,
    /// The explicit selection flag, the builder-API stand-in for an
    /// injection-constructor attribute
    pub marked: bool,
    pub(crate) construct: ConstructFn,
}

/// A property setter to run after construction
#[derive(Clone)]
pub struct PropertySpec {
    pub name: &'static str,
    pub param: DependencySpec,
    pub(crate) apply: ApplyFn,
}

/// A method call to run after property injection
#[derive(Clone)]
pub struct MethodSpec {
    pub name: &'static str,
    pub params: Vec<DependencySpec>,
    pub(crate) apply: ApplyFn,
}

/// Everything the build plan compiler may use about one concrete type
#[derive(Clone)]
pub struct TypeDescriptor {
    pub info: TypeInfo,
    pub constructors: Vec<ConstructorSpec>,
    pub properties: Vec<PropertySpec>,
    pub methods: Vec<MethodSpec>,
}

impl TypeDescriptor {
    pub fn describe<T: Injectable>() -> DescriptorBuilder<T> {
        DescriptorBuilder {
            info: TypeInfo::of::<T>(),
            constructors: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }
}

/// Chainable builder for [TypeDescriptor]
pub struct DescriptorBuilder<T> {
    info: TypeInfo,
    constructors: Vec<ConstructorSpec>,
    properties: Vec<PropertySpec>,
    methods: Vec<MethodSpec>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Injectable> DescriptorBuilder<T> {
    pub fn constructor(
        self,
        params: Vec<DependencySpec>,
        build: impl Fn(&ArgList) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Self {
        self.push_constructor(params, build, false)
    }

    /// Constructor explicitly chosen for injection; more than one marked
    /// constructor is a configuration error at plan time
    pub fn marked_constructor(
        self,
        params: Vec<DependencySpec>,
        build: impl Fn(&ArgList) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Self {
        self.push_constructor(params, build, true)
    }

    fn push_constructor(
        mut self,
        params: Vec<DependencySpec>,
        build: impl Fn(&ArgList) -> Result<T, DynError> + Send + Sync + 'static,
        marked: bool,
    ) -> Self {
        self.constructors.push(ConstructorSpec {
            params,
            marked,
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

    pub fn build(self) -> TypeDescriptor {
        TypeDescriptor {
            info: self.info,
            constructors: self.constructors,
            properties: self.properties,
            methods: self.methods,
        }
    }
}

pub(crate) fn erase_construct<T: Injectable>(
    build: impl Fn(&ArgList) -> Result<T, DynError> + Send + Sync + 'static,
) -> ConstructFn {
    Arc::new(move |args| build(args).map(|value| Instance::new(Arc::new(value))))
}

pub(crate) fn erase_apply<T: Injectable>(
    apply: impl Fn(&T, &ArgList) -> Result<(), DynError> + Send + Sync + 'static,
) -> ApplyFn {
    Arc::new(move |instance, args| {
        let target = instance.downcast::<T>().map_err(|actual| {
            Box::new(ArgError::Target {
                required: std::any::type_name::<T>(),
                actual,
            }) as DynError
        })?;
        apply(&target, args)
    })
}
