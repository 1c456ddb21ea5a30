#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for partition file I/O.
pub const TRACING_TARGET_IO: &str = "tabflow_core::io";

/// Tracing target for device memory initialization.
pub const TRACING_TARGET_DEVICE: &str = "tabflow_core::device";

mod column;
mod device;
mod error;
mod manifest;
mod partition;

pub mod io;

#[doc(hidden)]
pub mod prelude;

pub use column::{Column, ColumnValues, DType, Field, Schema};
pub use device::{
    DEFAULT_DEVICE_MEMORY, DEFAULT_RESERVATION_FRACTION, DeviceContext, MemoryConfig, Reservation,
};
pub use error::{BoxedError, Error, ErrorKind, Result};
pub use manifest::{ColumnKind, ColumnManifest};
pub use partition::Partition;
