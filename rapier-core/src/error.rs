use rapier_transport::{TemplateError, TransportError};
use thiserror::Error;

/// Errors raised while building or invoking a rapier API.
///
/// `MalformedDeclaration` and `RegistryMisuse` are construction-time errors.
/// Everything else is local to a single invocation and surfaces through the
/// failure path of its [`Deferred`](crate::Deferred).
#[derive(Debug, Error)]
pub enum RapierError {
    #[error("Malformed declaration at '{path}': {reason}")]
    MalformedDeclaration { path: String, reason: String },

    #[error("Stage '{stage}' failed: {source}")]
    PipelineStage {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Path template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Registry misuse: {0}")]
    RegistryMisuse(String),

    #[error("No invocable node at path '{0}'")]
    UnknownPath(String),
}

impl RapierError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RapierError::MalformedDeclaration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn stage(stage: impl Into<String>, source: anyhow::Error) -> Self {
        RapierError::PipelineStage {
            stage: stage.into(),
            source,
        }
    }

    pub fn registry(message: impl Into<String>) -> Self {
        RapierError::RegistryMisuse(message.into())
    }

    /// Construction-time errors stop client creation; the rest are per-call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RapierError::MalformedDeclaration { .. } | RapierError::RegistryMisuse(_)
        )
    }
}

pub type Result<T, E = RapierError> = std::result::Result<T, E>;
