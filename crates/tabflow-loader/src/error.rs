//! Loader error types.

use tabflow_core::ErrorKind;
use tabflow_runtime::RuntimeError;
use thiserror::Error;

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors raised while loading batches or running callbacks.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Loader or callback configuration is invalid.
    #[error("invalid loader configuration: {0}")]
    InvalidConfig(String),

    /// The producer thread failed or stopped before finishing an epoch.
    #[error("batch producer failed: {0}")]
    ProducerFailed(String),

    /// A requested feature is not among the loaded columns.
    #[error("feature `{feature}` is not loaded")]
    MissingFeature {
        /// Name of the feature.
        feature: String,
    },

    /// Dataset or file error.
    #[error(transparent)]
    Core(#[from] tabflow_core::Error),

    /// Workflow error raised by an inline transform.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl LoaderError {
    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::ProducerFailed(_) => ErrorKind::Internal,
            Self::MissingFeature { .. } => ErrorKind::Schema,
            Self::Core(error) => error.kind(),
            Self::Runtime(error) => error.kind(),
        }
    }

    pub(crate) fn missing(feature: impl Into<String>) -> Self {
        Self::MissingFeature {
            feature: feature.into(),
        }
    }
}
