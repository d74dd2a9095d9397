//! Resolve-on-invoke values.
//!
//! The two supported function-producing request shapes. Each holds a weak
//! handle back to the resolving container and performs a fresh top-level
//! resolve every time it is invoked; after the container is disposed or
//! dropped every invoke fails with `ContainerDisposed`.

use std::marker::PhantomData;

use crate::{
    container::WeakContainer,
    errors::ResolveError,
    types::{BuildKey, Injectable, TypeInfo},
};

#[derive(Clone, Debug)]
pub(crate) enum DeferredTarget {
    Key(BuildKey),
    All(TypeInfo),
}

/// Erased deferred request, typed by [Deferred] and [DeferredAll]
#[derive(Clone)]
pub struct DeferredHandle {
    pub(crate) container: WeakContainer,
    pub(crate) target: DeferredTarget,
}

/// Resolves one instance of `T` on every invoke
pub struct Deferred<T: Injectable + ?Sized> {
    handle: DeferredHandle,
    _marker: PhantomData<std::sync::Arc<T>>,
}

impl<T: Injectable + ?Sized> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Injectable + ?Sized> Deferred<T> {
    pub(crate) fn from_handle(handle: DeferredHandle) -> Self {
        Deferred {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn resolve(&self) -> Result<std::sync::Arc<T>, ResolveError> {
        let container = self.handle.container.upgrade()?;
        let key = match &self.handle.target {
            DeferredTarget::Key(key) => key.clone(),
            DeferredTarget::All(info) => BuildKey {
                info: *info,
                name: None,
                generic: None,
            },
        };
        let instance = container.resolve_erased(&key)?;
        instance
            .downcast::<T>()
            .map_err(|actual| ResolveError::TypeMismatch {
                required: std::any::type_name::<T>(),
                actual,
            })
    }
}

impl<T: Injectable + ?Sized> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Deferred")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

/// Resolves the full named snapshot of `T` on every invoke
pub struct DeferredAll<T: Injectable + ?Sized> {
    handle: DeferredHandle,
    _marker: PhantomData<std::sync::Arc<T>>,
}

impl<T: Injectable + ?Sized> Clone for DeferredAll<T> {
    fn clone(&self) -> Self {
        DeferredAll {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Injectable + ?Sized> DeferredAll<T> {
    pub(crate) fn from_handle(handle: DeferredHandle) -> Self {
        DeferredAll {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn resolve(&self) -> Result<Vec<std::sync::Arc<T>>, ResolveError> {
        let container = self.handle.container.upgrade()?;
        let info = match &self.handle.target {
            DeferredTarget::All(info) => *info,
            DeferredTarget::Key(key) => key.info,
        };
        let instances = container.resolve_all_erased(info)?;
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
}

impl<T: Injectable + ?Sized> std::fmt::Debug for DeferredAll<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeferredAll")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}
