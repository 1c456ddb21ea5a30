//! Prelude module for convenient imports.
//!
//! ```rust
//! use tabflow_loader::prelude::*;
//! ```

pub use crate::callback::{
    BinaryAccuracy, BinaryCrossEntropy, Callback, CallbackList, EpochLogs, MeanSquaredError,
    Metric, Predictor, ValidationCallback,
};
pub use crate::{
    Batch, LoaderConfig, LoaderConfigBuilder, LoaderError, LoaderResult, StreamingLoader, Tensor,
    Trainer,
};
