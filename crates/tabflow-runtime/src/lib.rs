#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for fit and transform passes.
pub const TRACING_TARGET_ENGINE: &str = "tabflow_runtime::engine";

/// Tracing target for statistics persistence.
pub const TRACING_TARGET_STATS: &str = "tabflow_runtime::stats";

/// Tracing target for feature column translation.
pub const TRACING_TARGET_TRANSLATE: &str = "tabflow_runtime::translate";

mod error;

pub mod engine;
pub mod ops;
pub mod stats;
pub mod translate;
pub mod workflow;

#[doc(hidden)]
pub mod prelude;

pub use engine::{Engine, EngineConfig, EngineConfigBuilder, InlineTransform, TransformOptions};
pub use error::{RuntimeError, RuntimeResult};
