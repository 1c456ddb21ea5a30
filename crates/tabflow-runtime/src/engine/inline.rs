//! Inline application of a fitted workflow.

use std::fmt;
use std::sync::Arc;

use tabflow_core::{ColumnManifest, Partition, Schema};

use crate::error::{RuntimeError, RuntimeResult};
use crate::stats::Statistics;
use crate::workflow::Workflow;

/// Shared function form of an [`InlineTransform`].
pub type PartitionFn = Arc<dyn Fn(&Partition) -> RuntimeResult<Partition> + Send + Sync>;

/// A workflow bound to its statistics, applied to partitions without
/// touching storage.
///
/// The handle is immutable and cheap to clone; a loader holds one and calls
/// it for every partition it reads.
#[derive(Clone)]
pub struct InlineTransform {
    workflow: Arc<Workflow>,
    stats: Option<Arc<Statistics>>,
}

impl InlineTransform {
    /// Binds a workflow to its statistics.
    ///
    /// Fails with unfit statistics when the workflow is stateful and no
    /// statistics are given.
    pub fn new(workflow: Arc<Workflow>, stats: Option<Arc<Statistics>>) -> RuntimeResult<Self> {
        if workflow.is_stateful() && stats.is_none() {
            return Err(RuntimeError::UnfitStatistics(
                "an inline transform of a stateful workflow needs fitted statistics".into(),
            ));
        }
        Ok(Self { workflow, stats })
    }

    /// Applies the workflow to one partition.
    pub fn apply(&self, part: &Partition) -> RuntimeResult<Partition> {
        self.workflow.apply(part, self.stats.as_deref())
    }

    /// Returns the output columns.
    pub fn final_columns(&self) -> &ColumnManifest {
        self.workflow.final_columns()
    }

    /// Checks an input schema and returns the output schema.
    pub fn output_schema(&self, schema: &Schema) -> RuntimeResult<Schema> {
        self.workflow.output_schema(schema)
    }

    /// Returns the workflow.
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Converts the handle into a plain function.
    pub fn into_fn(self) -> PartitionFn {
        Arc::new(move |part: &Partition| self.apply(part))
    }
}

impl fmt::Debug for InlineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineTransform")
            .field("fingerprint", &self.workflow.fingerprint())
            .field("fit_id", &self.stats.as_ref().map(|s| s.fit_id()))
            .finish()
    }
}
