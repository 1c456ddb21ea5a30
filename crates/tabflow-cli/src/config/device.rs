//! Device memory and reader configuration.

use anyhow::{Context, Result as AnyhowResult};
use clap::Args;
use serde::{Deserialize, Serialize};
use tabflow_core::io::ReaderOptions;
use tabflow_core::{DEFAULT_DEVICE_MEMORY, DeviceContext, MemoryConfig};

/// Device memory reservation and partition sizing.
///
/// # Environment Variables
///
/// - `TABFLOW_DEVICE_MEMORY` - Total device memory in bytes
/// - `TABFLOW_MEMORY_FRACTION` - Fraction of device memory to reserve
/// - `TABFLOW_MEMORY_BYTES` - Absolute reservation in bytes
/// - `TABFLOW_PART_SIZE` - Rows per partition
/// - `TABFLOW_PART_MEM_FRACTION` - Partition budget as a fraction of the reservation
///
/// # Examples
///
/// ```bash
/// tabflow --device-memory 17179869184 --memory-fraction 0.8 fit ...
/// TABFLOW_MEMORY_BYTES=4294967296 tabflow fit ...
/// ```
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct DeviceConfig {
    /// Total device memory in bytes.
    #[arg(long, env = "TABFLOW_DEVICE_MEMORY", default_value_t = DEFAULT_DEVICE_MEMORY)]
    pub device_memory: u64,

    /// Fraction of device memory reserved for preprocessing, in (0, 1].
    #[arg(long, env = "TABFLOW_MEMORY_FRACTION", conflicts_with = "memory_bytes")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_fraction: Option<f64>,

    /// Absolute number of bytes reserved for preprocessing.
    #[arg(long, env = "TABFLOW_MEMORY_BYTES")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,

    /// Rows per partition. Overrides the memory-based partition size.
    #[arg(long, env = "TABFLOW_PART_SIZE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_size: Option<usize>,

    /// Partition budget as a fraction of the reserved memory.
    #[arg(long, env = "TABFLOW_PART_MEM_FRACTION")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_mem_fraction: Option<f64>,
}

impl DeviceConfig {
    /// Returns the memory configuration described by these arguments.
    pub fn memory_config(&self) -> MemoryConfig {
        let config = MemoryConfig::new(self.device_memory);
        match (self.memory_fraction, self.memory_bytes) {
            (_, Some(bytes)) => config.with_bytes(bytes),
            (Some(fraction), None) => config.with_fraction(fraction),
            (None, None) => config,
        }
    }

    /// Returns the reader options described by these arguments.
    pub fn reader_options(&self) -> ReaderOptions {
        let mut options = ReaderOptions::new();
        if let Some(fraction) = self.part_mem_fraction {
            options = options.with_part_mem_fraction(fraction);
        }
        if let Some(rows) = self.part_size {
            options = options.with_part_size(rows);
        }
        options
    }

    /// Reserves device memory. Must run before any dataset is opened.
    pub fn initialize(&self) -> AnyhowResult<DeviceContext> {
        DeviceContext::initialize(self.memory_config()).context("failed to initialize device memory")
    }
}

#[cfg(test)]
mod tests {
    use tabflow_core::Reservation;

    use super::*;

    fn config() -> DeviceConfig {
        DeviceConfig {
            device_memory: 1 << 30,
            memory_fraction: None,
            memory_bytes: None,
            part_size: None,
            part_mem_fraction: None,
        }
    }

    #[test]
    fn test_default_reservation() {
        let memory = config().memory_config();
        assert_eq!(memory.reservation, Reservation::default());
        assert_eq!(memory.device_memory, 1 << 30);
    }

    #[test]
    fn test_bytes_reservation() {
        let memory = DeviceConfig {
            memory_bytes: Some(1 << 20),
            ..config()
        }
        .memory_config();
        assert_eq!(memory.reservation, Reservation::Bytes(1 << 20));
    }

    #[test]
    fn test_oversized_reservation_fails() {
        let device = DeviceConfig {
            memory_bytes: Some(1 << 31),
            ..config()
        };
        assert!(device.initialize().is_err());
    }
}
