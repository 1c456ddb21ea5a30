//! Workflow execution.
//!
//! [`Engine`] fits statistics over a [`Dataset`](tabflow_core::io::Dataset)
//! and writes transformed datasets; [`InlineTransform`] applies a fitted
//! workflow to partitions in memory.

mod config;
mod executor;
mod inline;
mod output;

pub use config::{EngineConfig, EngineConfigBuilder, EngineConfigBuilderError};
pub use executor::Engine;
pub use inline::{InlineTransform, PartitionFn};
pub use output::{TransformOptions, TransformSummary};
