//! Error and outcome types of the invocation pipeline.

use apiproc_core::{StageKind, TypeDescriptor, TypeMismatchError, Value};

use super::gate::StageLink;
use crate::stand_in::StandIn;

/// Fatal configuration problems, raised at registration or first resolution.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown declared type: {name}")]
    UnknownType { name: String },
    #[error("type '{name}' is concrete and cannot be used as an API")]
    NotDeclarable { name: String },
    #[error("type '{declared_type}' has no operation '{operation}'")]
    UnknownOperation {
        declared_type: String,
        operation: String,
    },
    #[error("no {kind} handler registered under '{name}'")]
    UnknownHandler { kind: StageKind, name: String },
    #[error("'{signature}' has no execution handler and no default is set")]
    MissingExecutionHandler { signature: String },
    #[error("cyclic inheritance: {}", .cycle.join(" -> "))]
    CyclicInheritance { cycle: Vec<String> },
    #[error("contradictory configuration for '{signature}': {reason}")]
    Contradictory { signature: String, reason: String },
    #[error("invalid value '{value}' for property '{key}': {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },
    #[error("at least one API must be registered")]
    NoApis,
}

/// Failure of a single dispatched call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("incompatible stage types in '{signature}' ({link})")]
    TypeMismatch {
        signature: String,
        link: StageLink,
        #[source]
        source: TypeMismatchError,
    },

    #[error("value of type '{actual}' does not fit '{expected}' in '{signature}' ({link})")]
    ValueMismatch {
        signature: String,
        link: StageLink,
        actual: TypeDescriptor,
        expected: TypeDescriptor,
    },

    #[error("{stage} stage of '{signature}' produced null, which '{expected}' does not accept")]
    NullNotAllowed {
        signature: String,
        stage: StageKind,
        expected: TypeDescriptor,
    },

    #[error("'{signature}' expects {expected} argument(s), got {actual}")]
    InvalidArguments {
        signature: String,
        expected: usize,
        actual: usize,
    },

    /// Execution failed and no fallback stage was bound.
    #[error("unhandled failure in '{signature}': {source}")]
    Unhandled {
        signature: String,
        #[source]
        source: anyhow::Error,
    },

    /// A request, error, fallback or response stage (or the dependency
    /// container) failed.
    #[error("{stage} stage of '{signature}' failed: {source}")]
    Stage {
        signature: String,
        stage: StageKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("'{signature}' {detail}")]
    UnexpectedOutcome {
        signature: String,
        detail: &'static str,
    },
}

impl DispatchError {
    /// Unwraps the error a stage or execution raised; other variants are
    /// converted as-is.
    #[must_use]
    pub fn into_source(self) -> anyhow::Error {
        match self {
            DispatchError::Unhandled { source, .. } | DispatchError::Stage { source, .. } => source,
            other => anyhow::Error::new(other),
        }
    }
}

/// Terminal state of a successful dispatch.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The pipeline produced a value.
    Returned(Value),
    /// A delegate operation produced a new stand-in.
    Delegated(StandIn),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn into_source_returns_original_error() {
        let err = DispatchError::Unhandled {
            signature: "A@b() -> int".into(),
            source: anyhow::Error::new(Boom),
        };
        assert!(err.to_string().contains("A@b() -> int"));
        assert!(err.into_source().downcast_ref::<Boom>().is_some());
    }

    #[test]
    fn configuration_errors_render_context() {
        let err = ConfigurationError::CyclicInheritance {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "cyclic inheritance: A -> B -> A");

        let err: DispatchError = ConfigurationError::UnknownHandler {
            kind: StageKind::Fallback,
            name: "nope".into(),
        }
        .into();
        assert_eq!(err.to_string(), "no fallback handler registered under 'nope'");
    }
}
