//! Error types for xrdiff-processor

use thiserror::Error;
use xrdiff_core::CoreError;
use xrdiff_kube::KubeError;

/// Result type for xrdiff-processor operations
pub type Result<T> = std::result::Result<T, DiffError>;

/// Errors that can occur while computing diffs
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiffError {
    /// The render loop failed with no way to make progress
    #[error("cannot render resources: {0}")]
    Render(String),

    /// Schema validation rejected the rendered resources
    #[error("cannot validate resources: {0}")]
    Validation(String),

    /// Diff generation or formatting failed
    #[error("cannot render diff: {0}")]
    Format(String),

    /// An operation failed; the context names the operation and subject
    #[error("{context}: {source}")]
    Op {
        context: String,
        #[source]
        source: Box<DiffError>,
    },

    /// Joined per-resource failures from processAll
    #[error("{0}")]
    Aggregate(String),

    /// Cluster access failed
    #[error(transparent)]
    Kube(#[from] KubeError),

    /// The object could not be interpreted
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl DiffError {
    /// Wrap with an operation context.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        DiffError::Op {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Context-wrapping shorthand for `Result<T, DiffError>`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.wrap(context))
    }
}
