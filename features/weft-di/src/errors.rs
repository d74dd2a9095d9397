use thiserror::Error;

use crate::types::{BuildKey, DynError, GenericFamily};

/// Errors in how the container was configured.
///
/// These surface immediately at the call that triggered registration or
/// plan compilation, never deferred behind a cache.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The requested type has neither a registration nor a type descriptor
    #[error("'{key}' is not constructable: no registration and no type descriptor")]
    NotConstructable { key: BuildKey },

    /// Constructor selection found no single winner
    #[error("ambiguous injection constructor for '{key}': {detail}")]
    AmbiguousConstructor { key: BuildKey, detail: &'static str },

    /// A closed-generic request did not fit the open registration's arity
    #[error("generic arity mismatch for {family}: request supplied {got} argument(s)")]
    GenericArityMismatch { family: GenericFamily, got: usize },

    /// The open-generic binder could not produce a closed registration
    #[error("open-generic binder for {family} rejected '{key}': {reason}")]
    GenericBindFailed {
        family: GenericFamily,
        key: BuildKey,
        reason: String,
    },

    /// A lifetime manager instance was attached to a second registration
    #[error("lifetime manager reuse: the manager given for '{key}' already belongs to another registration")]
    LifetimeReused { key: BuildKey },

    /// The descriptor declares no constructor the planner can use
    #[error("no usable injection constructor for '{key}': {detail}")]
    NoUsableConstructor { key: BuildKey, detail: &'static str },
}

/// Errors raised by a resolve call.
///
/// Failures inside the dependency graph are wrapped per build key, so the
/// source chain reads as the path from the top-level request down to the
/// step that actually failed.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The same build key was entered twice within one resolve call
    #[error("dependency cycle: {}", render_chain(.chain))]
    DependencyCycle { chain: Vec<BuildKey> },

    /// A strategy failed while building the given key
    #[error("building '{key}' failed in the {strategy} strategy (step {index})")]
    BuildFailed {
        key: BuildKey,
        strategy: &'static str,
        index: usize,
        #[source]
        source: Box<ResolveError>,
    },

    /// A user constructor, property setter or method call returned an error
    #[error("constructing '{key}' failed: {source}")]
    Construction {
        key: BuildKey,
        #[source]
        source: DynError,
    },

    /// An externally-controlled instance was dropped by its owner
    #[error("the externally controlled instance for '{key}' is no longer alive")]
    InstanceExpired { key: BuildKey },

    /// A stored instance did not have the requested type
    #[error("type mismatch: required '{required}' but the instance is '{actual}'")]
    TypeMismatch {
        required: &'static str,
        actual: &'static str,
    },

    /// The container was disposed before or during the call
    #[error("the container has been disposed")]
    ContainerDisposed,
}

impl ResolveError {
    /// The innermost non-wrapper error of the causal chain
    pub fn root_cause(&self) -> &ResolveError {
        match self {
            ResolveError::BuildFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Build keys of every wrapping frame, outermost first
    pub fn failure_path(&self) -> Vec<&BuildKey> {
        let mut path = Vec::new();
        let mut current = self;
        while let ResolveError::BuildFailed { key, source, .. } = current {
            path.push(key);
            current = source;
        }
        path
    }
}

fn render_chain(chain: &[BuildKey]) -> String {
    chain
        .iter()
        .map(BuildKey::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A single failed disposer, reported without interrupting the rest
#[derive(Error, Debug)]
#[error("disposing '{type_name}' failed: {source}")]
pub struct DisposeFailure {
    pub type_name: &'static str,
    #[source]
    pub source: DynError,
}

/// Aggregate of every disposer failure of one dispose call
#[derive(Debug)]
pub struct DisposeError {
    pub failures: Vec<DisposeFailure>,
}
impl std::error::Error for DisposeError {}
impl std::fmt::Display for DisposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push(format!(
            "{} instance(s) failed to dispose:",
            self.failures.len()
        ));
        for failure in &self.failures {
            display.push(format!("- {}", failure));
        }
        f.write_str(&display.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_cites_every_key() {
        let err = ResolveError::DependencyCycle {
            chain: vec![BuildKey::of::<u8>(), BuildKey::of::<u16>(), BuildKey::of::<u8>()],
        };
        let text = err.to_string();
        assert!(text.contains("u8 -> u16 -> u8"));
    }

    #[test]
    fn failure_path_walks_wrappers() {
        let inner = ResolveError::Construction {
            key: BuildKey::of::<u32>(),
            source: "bad wiring".into(),
        };
        let wrapped = ResolveError::BuildFailed {
            key: BuildKey::of::<u64>(),
            strategy: "creation",
            index: 1,
            source: Box::new(inner),
        };
        let path = wrapped.failure_path();
        assert_eq!(path.len(), 1);
        assert_eq!(*path[0], BuildKey::of::<u64>());
        assert!(matches!(
            wrapped.root_cause(),
            ResolveError::Construction { .. }
        ));
    }
}
