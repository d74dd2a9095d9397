//! Process-wide, read-only remediation hints per error kind.
//!
//! Initialized once on first use and never mutated afterwards. These feed
//! log lines and diagnostics only; the error types in [crate::errors] stay
//! the source of truth for what went wrong.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::errors::{ConfigError, ResolveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NotConstructable,
    AmbiguousConstructor,
    GenericArityMismatch,
    LifetimeReused,
    DependencyCycle,
    Construction,
    ContainerDisposed,
    Other,
}

static HINTS: Lazy<HashMap<MessageKind, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            MessageKind::NotConstructable,
            "register the type or a descriptor for it; trait objects always need an explicit registration",
        ),
        (
            MessageKind::AmbiguousConstructor,
            "mark exactly one constructor with use_constructor, or remove the tied overloads",
        ),
        (
            MessageKind::GenericArityMismatch,
            "the open registration and the closed request must agree on the number of type arguments",
        ),
        (
            MessageKind::LifetimeReused,
            "create a fresh lifetime manager per registration; one manager instance cannot serve two keys",
        ),
        (
            MessageKind::DependencyCycle,
            "break the cycle with a deferred dependency on one side",
        ),
        (
            MessageKind::Construction,
            "the wrapped source error comes from user construction code, not from the container",
        ),
        (
            MessageKind::ContainerDisposed,
            "resolve from a live container; disposal is permanent",
        ),
        (MessageKind::Other, "see the error chain for details"),
    ])
});

pub fn hint(kind: MessageKind) -> &'static str {
    HINTS.get(&kind).copied().unwrap_or("see the error chain for details")
}

/// Remediation hint for the root cause of a resolve failure
pub fn hint_for(error: &ResolveError) -> &'static str {
    let kind = match error.root_cause() {
        ResolveError::Config(config) => match config {
            ConfigError::NotConstructable { .. } => MessageKind::NotConstructable,
            ConfigError::AmbiguousConstructor { .. } => MessageKind::AmbiguousConstructor,
            ConfigError::GenericArityMismatch { .. } | ConfigError::GenericBindFailed { .. } => {
                MessageKind::GenericArityMismatch
            }
            ConfigError::LifetimeReused { .. } => MessageKind::LifetimeReused,
            ConfigError::NoUsableConstructor { .. } => MessageKind::AmbiguousConstructor,
        },
        ResolveError::DependencyCycle { .. } => MessageKind::DependencyCycle,
        ResolveError::Construction { .. } => MessageKind::Construction,
        ResolveError::ContainerDisposed => MessageKind::ContainerDisposed,
        _ => MessageKind::Other,
    };
    hint(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildKey;

    #[test]
    fn hints_cover_the_taxonomy() {
        let err = ResolveError::Config(ConfigError::NotConstructable {
            key: BuildKey::of::<u8>(),
        });
        assert!(hint_for(&err).contains("register"));
        assert!(!hint(MessageKind::DependencyCycle).is_empty());
    }
}
