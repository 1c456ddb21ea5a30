#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for batch production and training epochs.
pub const TRACING_TARGET_LOADER: &str = "tabflow_loader::loader";

/// Tracing target for epoch-end callbacks.
pub const TRACING_TARGET_CALLBACK: &str = "tabflow_loader::callback";

mod batch;
mod config;
mod error;
mod loader;
mod trainer;

pub mod callback;

#[doc(hidden)]
pub mod prelude;

pub use batch::{Batch, Tensor, TensorData};
pub use config::{DEFAULT_BATCH_SIZE, LoaderConfig, LoaderConfigBuilder, LoaderConfigBuilderError};
pub use error::{LoaderError, LoaderResult};
pub use loader::{Epoch, StreamingLoader};
pub use trainer::Trainer;
