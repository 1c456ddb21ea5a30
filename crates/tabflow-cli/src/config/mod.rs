//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── device: DeviceConfig   # Memory reservation, partition sizing
//! └── command: Command
//!     ├── fit                # Workflow, input, stats output
//!     ├── transform          # Workflow, input, stats, output options
//!     ├── fit-transform
//!     ├── inspect
//!     └── translate          # Feature columns to workflow definition
//! ```
//!
//! All configuration can be provided via CLI arguments, and the device
//! configuration via environment variables. Use `--help` to see all
//! available options.
//!
//! # Example
//!
//! ```bash
//! tabflow fit --workflow workflow.json --input 'train/*.tfp' --stats stats.json
//! tabflow transform --workflow workflow.json --input 'valid/*.tfp' \
//!     --stats stats.json --output valid_processed --shuffle per_worker
//! ```

mod command;
mod device;

use clap::Parser;
pub use command::{
    Command, FitArgs, FitTransformArgs, InspectArgs, OutputArgs, TransformArgs, TranslateArgs,
    WorkflowArgs,
};
pub use device::DeviceConfig;
use serde::{Deserialize, Serialize};

use crate::TRACING_TARGET_CONFIG;

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "tabflow")]
#[command(about = "Tabular preprocessing pipeline")]
#[command(version)]
pub struct Cli {
    /// Device memory and partition configuration.
    #[clap(flatten)]
    pub device: DeviceConfig,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded before clap parses arguments, so its values
    /// are visible as environment defaults.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Logs the parsed configuration at debug level.
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_CONFIG,
            device_memory = self.device.device_memory,
            memory_fraction = ?self.device.memory_fraction,
            memory_bytes = ?self.device.memory_bytes,
            part_size = ?self.device.part_size,
            "device configuration"
        );

        if let Ok(json) = serde_json::to_string(&self.command) {
            tracing::debug!(target: TRACING_TARGET_CONFIG, command = %json, "command configuration");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tabflow_core::io::Shuffle;

    use super::*;

    #[test]
    fn test_parse_transform() {
        let cli = Cli::try_parse_from([
            "tabflow",
            "--device-memory",
            "1073741824",
            "--memory-bytes",
            "1048576",
            "transform",
            "--workflow",
            "workflow.json",
            "--input",
            "valid/*.tfp",
            "--stats",
            "stats.json",
            "--output",
            "out",
            "--shuffle",
            "per_worker",
            "--dtype",
            "Age=float",
            "--dtype",
            "Type=int",
        ])
        .unwrap();

        assert_eq!(cli.device.memory_bytes, Some(1 << 20));
        let Command::Transform(args) = cli.command else {
            panic!("expected transform");
        };
        assert_eq!(args.workflow.input, "valid/*.tfp");
        assert_eq!(args.stats.as_deref(), Some(Path::new("stats.json")));
        assert_eq!(args.output.shuffle, Some(Shuffle::PerWorker));
        assert_eq!(args.output.dtypes, ["Age=float", "Type=int"]);
    }

    #[test]
    fn test_reservations_conflict() {
        let result = Cli::try_parse_from([
            "tabflow",
            "--memory-fraction",
            "0.5",
            "--memory-bytes",
            "1024",
            "inspect",
            "--input",
            "data",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fit_requires_stats_path() {
        let result = Cli::try_parse_from([
            "tabflow",
            "fit",
            "--workflow",
            "workflow.json",
            "--input",
            "data",
        ]);
        assert!(result.is_err());
    }
}
