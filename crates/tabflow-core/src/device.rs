//! Device memory configuration and the explicit initialization phase.
//!
//! The preprocessing library and the numeric runtime that trains the model
//! share one device. The reservation for preprocessing has to be settled
//! before either allocates, so it is resolved once into a [`DeviceContext`]
//! and every component that allocates takes that context at construction.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::TRACING_TARGET_DEVICE;
use crate::error::{Error, Result};

/// Default device capacity when none is configured: 16 GiB.
pub const DEFAULT_DEVICE_MEMORY: u64 = 16 * 1024 * 1024 * 1024;

/// Default fraction of device memory reserved for preprocessing.
pub const DEFAULT_RESERVATION_FRACTION: f64 = 0.5;

/// How much device memory preprocessing may claim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reservation {
    /// Fraction of device capacity, in `(0, 1]`.
    Fraction(f64),
    /// Absolute number of bytes.
    Bytes(u64),
}

impl Default for Reservation {
    fn default() -> Self {
        Self::Fraction(DEFAULT_RESERVATION_FRACTION)
    }
}

/// Device memory configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Total device memory in bytes.
    pub device_memory: u64,
    /// Memory reserved for preprocessing.
    #[serde(default)]
    pub reservation: Reservation,
}

impl MemoryConfig {
    /// Creates a configuration for a device of the given capacity.
    #[must_use]
    pub fn new(device_memory: u64) -> Self {
        Self {
            device_memory,
            reservation: Reservation::default(),
        }
    }

    /// Reserve a fraction of device memory.
    #[must_use]
    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.reservation = Reservation::Fraction(fraction);
        self
    }

    /// Reserve an absolute number of bytes.
    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.reservation = Reservation::Bytes(bytes);
        self
    }

    /// Validate the configuration shape; capacity checks happen in
    /// [`DeviceContext::initialize`].
    pub fn validate(&self) -> Result<()> {
        if self.device_memory == 0 {
            return Err(Error::configuration().with_message("device memory cannot be zero"));
        }
        match self.reservation {
            Reservation::Fraction(f) if !(f > 0.0 && f <= 1.0) => Err(Error::configuration()
                .with_message(format!("memory fraction {f} must be in (0, 1]"))),
            Reservation::Bytes(0) => {
                Err(Error::configuration().with_message("memory reservation cannot be zero bytes"))
            }
            _ => Ok(()),
        }
    }

    /// Returns the number of bytes the reservation asks for.
    pub fn requested_bytes(&self) -> u64 {
        match self.reservation {
            Reservation::Fraction(f) => (self.device_memory as f64 * f).floor() as u64,
            Reservation::Bytes(b) => b,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_MEMORY)
    }
}

/// Resolved device memory reservation.
///
/// Obtaining one is the initialization phase: engines and loaders require a
/// reference to it, so nothing can allocate before the reservation is fixed.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    config: MemoryConfig,
    reserved_bytes: u64,
    initialized_at: Timestamp,
}

impl DeviceContext {
    /// Resolves the reservation against the device capacity.
    ///
    /// Fails with a resource error naming the requested and available bytes
    /// when the reservation does not fit.
    pub fn initialize(config: MemoryConfig) -> Result<Self> {
        config.validate()?;

        let requested = config.requested_bytes();
        if requested > config.device_memory {
            return Err(Error::resource().with_message(format!(
                "requested {requested} bytes of device memory but only {} are available",
                config.device_memory
            )));
        }
        if requested == 0 {
            return Err(Error::resource().with_message(format!(
                "reservation resolves to 0 bytes on a device with {} bytes",
                config.device_memory
            )));
        }

        tracing::info!(
            target: TRACING_TARGET_DEVICE,
            device_memory = config.device_memory,
            reserved_bytes = requested,
            runtime_bytes = config.device_memory - requested,
            "Device memory reserved"
        );

        Ok(Self {
            config,
            reserved_bytes: requested,
            initialized_at: Timestamp::now(),
        })
    }

    /// Returns the configuration this context was resolved from.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Bytes reserved for preprocessing.
    #[inline]
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes
    }

    /// Bytes left for the numeric runtime.
    #[inline]
    pub fn runtime_bytes(&self) -> u64 {
        self.config.device_memory - self.reserved_bytes
    }

    /// When the reservation was resolved.
    pub fn initialized_at(&self) -> Timestamp {
        self.initialized_at
    }

    /// Bytes a single partition may occupy, as a fraction of the reservation.
    pub fn partition_budget(&self, part_mem_fraction: f64) -> u64 {
        let fraction = part_mem_fraction.clamp(f64::MIN_POSITIVE, 1.0);
        ((self.reserved_bytes as f64) * fraction).max(1.0) as u64
    }
}
