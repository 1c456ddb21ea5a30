//! Loader configuration.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Default number of rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Configuration for a [`StreamingLoader`](crate::StreamingLoader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct LoaderConfig {
    /// Rows per batch. The last batch of a working set may be smaller.
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,

    /// Shuffle partition order and rows within each working set.
    #[builder(default = "false")]
    pub shuffle: bool,

    /// Partitions buffered per working set.
    #[builder(default = "1")]
    pub buffer_size: usize,

    /// Batches produced ahead of the consumer.
    #[builder(default = "2")]
    pub prefetch: usize,

    /// Base seed; epoch `e` shuffles with `seed + e`.
    #[builder(default = "0")]
    pub seed: u64,
}

impl LoaderConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("buffer_size", self.buffer_size),
            ("prefetch", self.prefetch),
        ] {
            if let Some(0) = value {
                return Err(format!("{name} must be at least 1"));
            }
        }
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            shuffle: false,
            buffer_size: 1,
            prefetch: 2,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = LoaderConfigBuilder::default().build().unwrap();
        assert_eq!(config, LoaderConfig::default());
    }

    #[test]
    fn test_builder_validation() {
        assert!(LoaderConfigBuilder::default().batch_size(0usize).build().is_err());
        assert!(LoaderConfigBuilder::default().prefetch(0usize).build().is_err());
        let config = LoaderConfigBuilder::default()
            .batch_size(32usize)
            .shuffle(true)
            .build()
            .unwrap();
        assert_eq!(config.batch_size, 32);
        assert!(config.shuffle);
    }
}
