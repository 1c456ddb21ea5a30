//! Prelude module for convenient imports.
//!
//! ```rust
//! use tabflow_core::prelude::*;
//! ```

pub use crate::io::{Dataset, DatasetWriter, ReaderOptions, Shuffle, WriterOptions};
pub use crate::{
    Column, ColumnKind, ColumnManifest, ColumnValues, DType, DeviceContext, Error, ErrorKind,
    MemoryConfig, Partition, Result, Schema,
};
