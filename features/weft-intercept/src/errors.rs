use thiserror::Error;

use weft_di::BuildKey;

use crate::proxy::Mechanism;

#[derive(Error, Debug)]
pub enum InterceptError {
    /// The chosen proxy mechanism has no implementation on this platform.
    /// Raised at proxy-creation time, never at call time.
    #[error("the {mechanism} proxy mechanism is not supported on this platform")]
    MechanismUnsupported { mechanism: Mechanism },

    /// Interception requires an existing registration to wrap
    #[error("no registration found for '{key}' to intercept")]
    TargetNotRegistered { key: BuildKey },
}
