//! CLI error types with exit code handling

use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that maps to process exit codes
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Input documents could not be read or parsed
    #[error("Input error: {message}")]
    #[diagnostic(code(xrdiff::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Cluster connection or cache initialization failed
    #[error("Cluster error: {message}")]
    #[diagnostic(code(xrdiff::cli::cluster))]
    Cluster { message: String },

    /// One or more XRs failed to process
    #[error("{message}")]
    #[diagnostic(code(xrdiff::cli::diff))]
    Diff { message: String },

    /// The overall deadline elapsed
    #[error("operation timed out after {0}")]
    #[diagnostic(code(xrdiff::cli::timeout))]
    Timeout(String),

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(xrdiff::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Input { .. } => exit_codes::INPUT_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Timeout(_) => exit_codes::TIMEOUT,
            CliError::Diff { .. } | CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: None,
        }
    }

    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
        }
    }

    pub fn diff(message: impl Into<String>) -> Self {
        Self::Diff {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
