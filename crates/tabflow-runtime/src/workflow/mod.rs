//! Workflow definitions and their compiled form.
//!
//! - [`WorkflowDefinition`]: the serializable manifest + steps description
//! - [`WorkflowCompiler`]: validation and graph construction
//! - [`Workflow`]: the immutable compiled graph the engine executes

mod compiled;
mod compiler;
mod definition;

pub(crate) use compiled::FitState;
pub use compiled::{Node, Workflow};
pub use compiler::WorkflowCompiler;
pub use definition::{ColumnSelector, Step, WorkflowDefinition};
