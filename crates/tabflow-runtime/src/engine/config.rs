//! Engine configuration.

use derive_builder::Builder;

/// Configuration for the fit/transform engine.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Number of parallel workers for fit and transform passes. Files are
    /// split between workers, so at most one worker per file runs.
    #[builder(default = "1")]
    pub num_workers: usize,

    /// Seed for sampled statistics and output shuffling.
    #[builder(default = "0")]
    pub seed: u64,
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.num_workers {
            return Err("num_workers must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfigBuilder::default().build().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_builder_rejects_zero_workers() {
        assert!(EngineConfigBuilder::default().num_workers(0usize).build().is_err());
    }
}
