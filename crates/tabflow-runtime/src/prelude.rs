//! Prelude module for convenient imports.
//!
//! ```rust
//! use tabflow_runtime::prelude::*;
//! ```

pub use crate::engine::{
    Engine, EngineConfig, EngineConfigBuilder, InlineTransform, PartitionFn, TransformOptions,
    TransformSummary,
};
pub use crate::ops::{FillValue, Oov, Operator, OperatorId};
pub use crate::stats::{Statistic, Statistics};
pub use crate::translate::{CrossKey, FeatureColumn, ReducedFeature, Translation, Translator};
pub use crate::workflow::{ColumnSelector, Step, Workflow, WorkflowDefinition};
pub use crate::{RuntimeError, RuntimeResult};
