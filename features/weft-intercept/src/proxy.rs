//! Proxy mechanisms and container integration.
//!
//! Rust has one honest proxy shape: a hand- or macro-written type that
//! implements the target trait and routes every method through its
//! [PipelineSet]. The other two mechanisms of the source model (subclassing
//! virtual members, ambient remoting proxies) have no equivalent here and
//! fail at proxy-creation time rather than pretending.

use std::sync::Arc;

use weft_di::{BuildKey, Container, Injectable};

use crate::{
    call::MethodProfile,
    errors::InterceptError,
    pipeline::{InterceptionPolicy, PipelineSet},
};

/// How the proxy wraps its target. A configuration input, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Trait-object forwarding proxy; the supported mechanism
    InterfaceProxy,
    /// Subclass-and-override; unsupported, Rust has no inheritance
    VirtualMethodProxy,
    /// Cross-boundary marshalling proxy; unsupported on this platform
    AmbientProxy,
}

impl std::fmt::Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mechanism::InterfaceProxy => "interface",
            Mechanism::VirtualMethodProxy => "virtual-method",
            Mechanism::AmbientProxy => "ambient",
        };
        f.write_str(name)
    }
}

/// Validate the mechanism and freeze the per-method pipelines.
///
/// Matching rules run here, once per method; the returned set is shared by
/// every proxy instance the registration produces.
pub fn build_pipelines(
    mechanism: Mechanism,
    policy: &InterceptionPolicy,
    methods: &[MethodProfile],
) -> Result<Arc<PipelineSet>, InterceptError> {
    match mechanism {
        Mechanism::InterfaceProxy => Ok(Arc::new(policy.pipelines_for(methods))),
        other => Err(InterceptError::MechanismUnsupported { mechanism: other }),
    }
}

/// Wrap an existing registration in an interception proxy.
///
/// From now on every instance the registration produces is decorated with
/// the proxy the factory builds; the resolved object callers see is the
/// proxy. The factory receives the bare target and the shared pipeline set.
pub fn intercept<T: Injectable + ?Sized>(
    container: &Container,
    name: Option<&str>,
    mechanism: Mechanism,
    policy: InterceptionPolicy,
    methods: &[MethodProfile],
    make_proxy: impl Fn(Arc<T>, Arc<PipelineSet>) -> Arc<T> + Send + Sync + 'static,
) -> Result<(), InterceptError> {
    let pipelines = build_pipelines(mechanism, &policy, methods)?;

    let installed = container.decorate::<T>(name, move |target| {
        make_proxy(target, pipelines.clone())
    });
    if !installed {
        return Err(InterceptError::TargetNotRegistered {
            key: BuildKey::of::<T>().with_name(name.map(Arc::from)),
        });
    }
    tracing::debug!(
        service = std::any::type_name::<T>(),
        %mechanism,
        "installed interception proxy"
    );
    Ok(())
}
