//! Transform output options and results.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tabflow_core::DType;
use tabflow_core::io::{DatasetMetadata, Shuffle, WrittenFile};

use crate::error::{RuntimeError, RuntimeResult};

/// Where and how a transform pass writes its output.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    /// Output directory.
    pub path: PathBuf,
    /// Row shuffling, if any.
    pub shuffle: Option<Shuffle>,
    /// Number of files each worker writes.
    pub out_files_per_worker: usize,
    /// Output type overrides, by final column name.
    pub dtypes: BTreeMap<String, DType>,
    /// Whether to write the dataset metadata file.
    pub write_metadata: bool,
    /// Dedicated IO threads per worker; `0` writes on the worker thread.
    pub num_io_threads: usize,
}

impl TransformOptions {
    /// Writes into `path` without shuffling, one file per worker.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            shuffle: None,
            out_files_per_worker: 1,
            dtypes: BTreeMap::new(),
            write_metadata: true,
            num_io_threads: 0,
        }
    }

    /// Set the shuffle mode.
    #[must_use]
    pub fn with_shuffle(mut self, shuffle: Shuffle) -> Self {
        self.shuffle = Some(shuffle);
        self
    }

    /// Set the number of files per worker.
    #[must_use]
    pub fn with_out_files_per_worker(mut self, files: usize) -> Self {
        self.out_files_per_worker = files;
        self
    }

    /// Cast an output column.
    #[must_use]
    pub fn with_dtype(mut self, column: impl Into<String>, dtype: DType) -> Self {
        self.dtypes.insert(column.into(), dtype);
        self
    }

    /// Set the number of IO threads per worker.
    #[must_use]
    pub fn with_num_io_threads(mut self, threads: usize) -> Self {
        self.num_io_threads = threads;
        self
    }

    /// Skip the metadata file.
    #[must_use]
    pub fn without_metadata(mut self) -> Self {
        self.write_metadata = false;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.out_files_per_worker == 0 {
            return Err(RuntimeError::InvalidDefinition(
                "out_files_per_worker must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Result of a transform pass.
#[derive(Debug, Clone)]
pub struct TransformSummary {
    /// Files written, in worker order.
    pub files: Vec<WrittenFile>,
    /// Rows written.
    pub num_rows: usize,
    /// Input partitions processed.
    pub num_partitions: usize,
    /// Wall time of the pass.
    pub elapsed: Duration,
    /// Description of the output, as written to the metadata file.
    pub metadata: DatasetMetadata,
}
