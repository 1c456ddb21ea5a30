//! Runtime error types.

use tabflow_core::{DType, ErrorKind};
use thiserror::Error;

use crate::ops::OperatorId;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors raised while compiling, fitting or applying a workflow.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A step or the manifest references a column that does not exist.
    #[error("unknown column `{column}` referenced by {context}")]
    UnknownColumn {
        /// Name of the missing column.
        column: String,
        /// Where the reference was made (a step, the manifest, ...).
        context: String,
    },

    /// An operator was applied to a column of an unsupported type.
    #[error("operator {operator} cannot be applied to {dtype} column `{column}`: expected {expected}")]
    ColumnTypeMismatch {
        /// Operator that rejected the column.
        operator: OperatorId,
        /// Name of the column.
        column: String,
        /// Actual column type.
        dtype: DType,
        /// Description of the accepted types.
        expected: String,
    },

    /// A stateful operator was applied before its statistics were fit.
    #[error("unfit statistics: {0}")]
    UnfitStatistics(String),

    /// A feature column has no equivalent workflow.
    #[error("untranslatable feature `{feature}`: {reason}")]
    UntranslatableFeature {
        /// Name of the feature.
        feature: String,
        /// Why it cannot be translated.
        reason: String,
    },

    /// Workflow definition or engine configuration is invalid.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Dataset or file error.
    #[error(transparent)]
    Core(#[from] tabflow_core::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownColumn { .. } | Self::ColumnTypeMismatch { .. } => ErrorKind::Schema,
            Self::UnfitStatistics(_) => ErrorKind::Sequencing,
            Self::UntranslatableFeature { .. } | Self::InvalidDefinition(_) => {
                ErrorKind::Configuration
            }
            Self::Core(error) => error.kind(),
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unknown_column(column: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnknownColumn {
            column: column.into(),
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            RuntimeError::unknown_column("Age", "step 0").kind(),
            ErrorKind::Schema
        );
        assert_eq!(
            RuntimeError::UnfitStatistics("normalize".into()).kind(),
            ErrorKind::Sequencing
        );
        assert_eq!(
            RuntimeError::from(tabflow_core::Error::io()).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_display() {
        let error = RuntimeError::unknown_column("Breed", "step 2");
        assert_eq!(
            error.to_string(),
            "unknown column `Breed` referenced by step 2"
        );
    }
}
