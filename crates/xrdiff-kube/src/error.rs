//! Error types for xrdiff-kube

use thiserror::Error;
use xrdiff_core::CoreError;

/// Result type for xrdiff-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while talking to the cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// A direct get found nothing; callers treat this as "new object"
    #[error("resource {name} of kind {kind} not found")]
    NotFound { kind: String, name: String },

    /// Discovery could not resolve the group/version
    #[error("failed to discover resources for {api_version}")]
    Discovery { api_version: String },

    /// An operation failed; the context names the operation and subject
    #[error("{context}: {source}")]
    Op {
        context: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Composition selection failed (message is the full user-facing text)
    #[error("{0}")]
    Composition(String),

    /// Pipeline interpretation failed (message is the full user-facing text)
    #[error("{0}")]
    Pipeline(String),

    /// getAllResourcesByLabels input arity mismatch
    #[error("number of GVKs must match number of selectors")]
    SelectorMismatch,

    /// The object could not be interpreted
    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all for failures that carry their full message
    #[error("{0}")]
    Other(String),
}

impl KubeError {
    /// Check for a Kubernetes 404, whether raw or already classified.
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            KubeError::Op { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Wrap with an operation context.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        KubeError::Op {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Context-wrapping shorthand for `Result<T, KubeError>`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.wrap(context))
    }
}
