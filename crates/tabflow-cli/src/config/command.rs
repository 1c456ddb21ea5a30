//! Subcommands and their arguments.

use std::path::PathBuf;

use anyhow::{Context, Result as AnyhowResult, bail};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabflow_core::DType;
use tabflow_core::io::Shuffle;
use tabflow_runtime::engine::TransformOptions;
use tabflow_runtime::{EngineConfig, EngineConfigBuilder};

/// Subcommands.
#[derive(Debug, Clone, Subcommand, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Computes workflow statistics over a dataset and saves them.
    Fit(FitArgs),
    /// Applies a fitted workflow to a dataset and writes the result.
    Transform(TransformArgs),
    /// Fits a workflow and transforms the same dataset.
    FitTransform(FitTransformArgs),
    /// Prints the schema and row count of a dataset.
    Inspect(InspectArgs),
    /// Converts feature column declarations into a workflow definition.
    Translate(TranslateArgs),
}

/// Workflow, input and parallelism shared by the engine subcommands.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct WorkflowArgs {
    /// Path to the workflow definition (JSON).
    #[arg(short, long, env = "TABFLOW_WORKFLOW")]
    pub workflow: PathBuf,

    /// Input files: a directory, a single file or a glob pattern.
    #[arg(short, long)]
    pub input: String,

    /// Number of parallel workers.
    #[arg(long, env = "TABFLOW_NUM_WORKERS", default_value_t = 1)]
    pub num_workers: usize,

    /// Seed for sampled statistics and shuffling.
    #[arg(long, env = "TABFLOW_SEED", default_value_t = 0)]
    pub seed: u64,
}

impl WorkflowArgs {
    /// Returns the engine configuration.
    pub fn engine_config(&self) -> AnyhowResult<EngineConfig> {
        EngineConfigBuilder::default()
            .num_workers(self.num_workers)
            .seed(self.seed)
            .build()
            .context("invalid engine configuration")
    }
}

/// Where and how transformed data is written.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct OutputArgs {
    /// Output directory.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Shuffle mode: `per_partition` or `per_worker`.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<Shuffle>,

    /// Number of files written by each worker.
    #[arg(long, default_value_t = 1)]
    pub out_files_per_worker: usize,

    /// Output type override, as `column=float|int|str`. Repeatable.
    #[arg(long = "dtype", value_name = "COLUMN=DTYPE")]
    #[serde(default)]
    pub dtypes: Vec<String>,

    /// Skip writing the dataset metadata file.
    #[arg(long)]
    #[serde(default)]
    pub no_metadata: bool,

    /// Dedicated IO threads per worker; 0 writes on the worker thread.
    #[arg(long, default_value_t = 0)]
    #[serde(default)]
    pub num_io_threads: usize,
}

impl OutputArgs {
    /// Returns the transform options.
    pub fn transform_options(&self) -> AnyhowResult<TransformOptions> {
        let mut options = TransformOptions::new(self.output.clone())
            .with_out_files_per_worker(self.out_files_per_worker)
            .with_num_io_threads(self.num_io_threads);
        if let Some(shuffle) = self.shuffle {
            options = options.with_shuffle(shuffle);
        }
        for entry in &self.dtypes {
            let (column, dtype) = parse_dtype(entry)?;
            options = options.with_dtype(column, dtype);
        }
        if self.no_metadata {
            options = options.without_metadata();
        }
        Ok(options)
    }
}

fn parse_dtype(entry: &str) -> AnyhowResult<(&str, DType)> {
    let Some((column, dtype)) = entry.split_once('=') else {
        bail!("dtype override `{entry}` must look like COLUMN=DTYPE");
    };
    if column.is_empty() {
        bail!("dtype override `{entry}` names no column");
    }
    let dtype = dtype
        .parse::<DType>()
        .with_context(|| format!("unknown dtype in override `{entry}`"))?;
    Ok((column, dtype))
}

/// Arguments of `fit`.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct FitArgs {
    #[clap(flatten)]
    pub workflow: WorkflowArgs,

    /// Where to save the fitted statistics.
    #[arg(short, long)]
    pub stats: PathBuf,
}

/// Arguments of `transform`.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct TransformArgs {
    #[clap(flatten)]
    pub workflow: WorkflowArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Statistics saved by `fit`. Required for stateful workflows.
    #[arg(short, long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PathBuf>,
}

/// Arguments of `fit-transform`.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct FitTransformArgs {
    #[clap(flatten)]
    pub workflow: WorkflowArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Where to save the fitted statistics, if anywhere.
    #[arg(short, long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PathBuf>,
}

/// Arguments of `inspect`.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct InspectArgs {
    /// Input files: a directory, a single file or a glob pattern.
    #[arg(short, long)]
    pub input: String,
}

/// Arguments of `translate`.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct TranslateArgs {
    /// Path to a JSON array of feature column declarations.
    #[arg(short, long)]
    pub features: PathBuf,

    /// Label column. Repeatable.
    #[arg(short, long)]
    #[serde(default)]
    pub label: Vec<String>,

    /// Where to save the resulting workflow definition.
    #[arg(short, long)]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(dtypes: &[&str]) -> OutputArgs {
        OutputArgs {
            output: PathBuf::from("out"),
            shuffle: Some(Shuffle::PerWorker),
            out_files_per_worker: 2,
            dtypes: dtypes.iter().map(|s| (*s).to_owned()).collect(),
            no_metadata: false,
            num_io_threads: 3,
        }
    }

    #[test]
    fn test_transform_options() {
        let options = output(&["Age=float", "Type=int"]).transform_options().unwrap();
        assert_eq!(options.shuffle, Some(Shuffle::PerWorker));
        assert_eq!(options.out_files_per_worker, 2);
        assert_eq!(options.num_io_threads, 3);
        assert_eq!(options.dtypes.get("Age"), Some(&DType::Float));
        assert_eq!(options.dtypes.get("Type"), Some(&DType::Int));
        assert!(options.write_metadata);
    }

    #[test]
    fn test_rejects_malformed_dtype() {
        assert!(output(&["Age"]).transform_options().is_err());
        assert!(output(&["=int"]).transform_options().is_err());
        assert!(output(&["Age=double"]).transform_options().is_err());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let args = WorkflowArgs {
            workflow: PathBuf::from("workflow.json"),
            input: "data".into(),
            num_workers: 0,
            seed: 0,
        };
        assert!(args.engine_config().is_err());
    }
}
