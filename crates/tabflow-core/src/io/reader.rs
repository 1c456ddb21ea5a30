//! Dataset reader streaming bounded-size partitions from partition files.

use std::collections::VecDeque;
use std::ops::Range;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::format::{PartitionFileReader, count_rows, read_header, row_group_sizes};
use super::glob::FilePattern;
use crate::TRACING_TARGET_IO;
use crate::column::{Field, Schema};
use crate::device::DeviceContext;
use crate::error::{Error, Result};
use crate::partition::Partition;

/// Default fraction of the device reservation one partition may use.
pub const DEFAULT_PART_MEM_FRACTION: f64 = 0.125;

/// Options controlling how files are cut into partitions.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    /// Fixed number of rows per partition; overrides the memory-derived size.
    pub part_size: Option<usize>,
    /// Fraction of the device reservation one partition may occupy.
    pub part_mem_fraction: f64,
    /// Columns to read; all columns when `None`.
    pub columns: Option<Vec<String>>,
}

impl ReaderOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            part_size: None,
            part_mem_fraction: DEFAULT_PART_MEM_FRACTION,
            columns: None,
        }
    }

    /// Set a fixed number of rows per partition.
    #[must_use]
    pub fn with_part_size(mut self, rows: usize) -> Self {
        self.part_size = Some(rows);
        self
    }

    /// Set the fraction of the device reservation one partition may occupy.
    #[must_use]
    pub fn with_part_mem_fraction(mut self, fraction: f64) -> Self {
        self.part_mem_fraction = fraction;
        self
    }

    /// Read only these columns.
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.part_size == Some(0) {
            return Err(Error::configuration().with_message("part size cannot be zero"));
        }
        if !(self.part_mem_fraction > 0.0 && self.part_mem_fraction <= 1.0) {
            return Err(Error::configuration().with_message(format!(
                "part memory fraction {} must be in (0, 1]",
                self.part_mem_fraction
            )));
        }
        Ok(())
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `total` items among `num_workers` and returns the range owned by
/// `worker_id`.
///
/// Ranges are contiguous, disjoint, cover `0..total` and differ in size by at
/// most one.
pub fn shard_range(total: usize, worker_id: usize, num_workers: usize) -> Range<usize> {
    let num_workers = num_workers.max(1);
    let base = total / num_workers;
    let rem = total % num_workers;

    let start = worker_id * base + worker_id.min(rem);
    let extra = usize::from(worker_id < rem);
    start..(start + base + extra).min(total)
}

/// A set of partition files with a common schema.
///
/// Opening a dataset reads every file header, so schema problems surface
/// before any data is streamed.
#[derive(Debug, Clone)]
pub struct Dataset {
    files: Vec<PathBuf>,
    schema: Schema,
    columns: Option<Vec<String>>,
    part_size: usize,
}

impl Dataset {
    /// Opens every file matching `pattern` (a glob or a directory).
    pub fn open(pattern: &str, device: &DeviceContext, options: ReaderOptions) -> Result<Self> {
        let files = FilePattern::new(pattern)?.expand()?;
        if files.is_empty() {
            return Err(Error::io().with_message(format!("no partition files match {pattern}")));
        }
        Self::from_files(files, device, options)
    }

    /// Opens an explicit list of files.
    pub fn from_files(
        files: Vec<PathBuf>,
        device: &DeviceContext,
        options: ReaderOptions,
    ) -> Result<Self> {
        options.validate()?;

        let Some(first) = files.first() else {
            return Err(Error::io().with_message("dataset has no files"));
        };
        let file_schema = read_header(first)?.schema;

        for path in &files[1..] {
            if read_header(path)?.schema != file_schema {
                return Err(Error::schema().with_message(format!(
                    "schema of {} differs from {}",
                    path.display(),
                    first.display()
                )));
            }
        }

        let schema = match &options.columns {
            Some(columns) => project(&file_schema, columns)?,
            None => file_schema,
        };

        let part_size = options.part_size.unwrap_or_else(|| {
            let budget = device.partition_budget(options.part_mem_fraction);
            let row_bytes = schema.estimated_row_bytes().max(1) as u64;
            usize::try_from(budget / row_bytes).unwrap_or(usize::MAX)
        });
        let part_size = part_size.max(1);

        tracing::debug!(
            target: TRACING_TARGET_IO,
            files = files.len(),
            columns = schema.len(),
            part_size,
            "Dataset opened"
        );

        Ok(Self {
            files,
            schema,
            columns: options.columns,
            part_size,
        })
    }

    /// Returns the files, in read order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Returns the number of files.
    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Returns the schema of the partitions this dataset yields.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the maximum number of rows per partition.
    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Returns a copy with a different partition size.
    #[must_use]
    pub fn with_part_size(mut self, rows: usize) -> Self {
        self.part_size = rows.max(1);
        self
    }

    /// Counts rows across all files.
    pub fn num_rows(&self) -> Result<usize> {
        self.files.iter().map(count_rows).sum()
    }

    /// Returns the row count of every partition [`Dataset::partitions_in`]
    /// yields for `order`, reading only row group lengths.
    pub fn partition_sizes(&self, order: &[usize]) -> Result<Vec<usize>> {
        let mut sizes = Vec::new();
        for &i in order {
            let groups = row_group_sizes(&self.files[i])?;
            sizes.extend(coalesce_row_groups(&groups, self.part_size));
        }
        Ok(sizes)
    }

    /// Returns the subset of files owned by one of `num_workers` workers.
    pub fn shard(&self, worker_id: usize, num_workers: usize) -> Self {
        let range = shard_range(self.files.len(), worker_id, num_workers);
        Self {
            files: self.files[range].to_vec(),
            ..self.clone()
        }
    }

    /// Returns file indices in read order, shuffled when a seed is given.
    pub fn file_order(&self, seed: Option<u64>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.files.len()).collect();
        if let Some(seed) = seed {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        order
    }

    /// Streams partitions from every file in order.
    pub fn partitions(&self) -> Partitions {
        self.partitions_in(self.file_order(None))
    }

    /// Streams partitions from the files at `order`.
    pub fn partitions_in(&self, order: Vec<usize>) -> Partitions {
        Partitions {
            files: order.into_iter().map(|i| self.files[i].clone()).collect(),
            columns: self.columns.clone(),
            part_size: self.part_size,
            current: None,
            pending: VecDeque::new(),
            failed: false,
        }
    }
}

fn project(schema: &Schema, columns: &[String]) -> Result<Schema> {
    columns
        .iter()
        .map(|name| {
            schema.field(name).cloned().ok_or_else(|| {
                Error::schema().with_message(format!("column `{name}` not found in dataset"))
            })
        })
        .collect::<Result<Vec<Field>>>()
        .map(Schema::new)
}

/// Partition sizes of one file with the given row group sizes. Mirrors
/// [`Partitions`]: groups accumulate until they reach `part_size`, then the
/// run is split into `part_size` chunks.
fn coalesce_row_groups(groups: &[usize], part_size: usize) -> Vec<usize> {
    let part_size = part_size.max(1);
    let mut sizes = Vec::new();
    let mut split = |mut rows: usize| {
        while rows > 0 {
            sizes.push(rows.min(part_size));
            rows -= rows.min(part_size);
        }
    };

    let mut run = 0;
    for &rows in groups {
        run += rows;
        if run >= part_size {
            split(run);
            run = 0;
        }
    }
    split(run);
    sizes
}

/// Iterator over the partitions of a dataset.
///
/// Row groups of one file are coalesced up to the partition size and split
/// when larger, so partitions never span two files. The first error ends
/// the iteration.
#[derive(Debug)]
pub struct Partitions {
    files: VecDeque<PathBuf>,
    columns: Option<Vec<String>>,
    part_size: usize,
    current: Option<PartitionFileReader>,
    pending: VecDeque<Partition>,
    failed: bool,
}

impl Partitions {
    /// Returns the file currently being read.
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_ref().map(PartitionFileReader::path)
    }

    fn fill(&mut self) -> Result<bool> {
        let reader = match &mut self.current {
            Some(reader) => reader,
            None => {
                let Some(path) = self.files.pop_front() else {
                    return Ok(false);
                };
                tracing::trace!(target: TRACING_TARGET_IO, path = %path.display(), "Opening file");
                self.current.insert(PartitionFileReader::open(path)?)
            }
        };

        let mut groups = Vec::new();
        let mut rows = 0;
        while rows < self.part_size {
            match reader.next_row_group()? {
                Some(group) => {
                    rows += group.num_rows();
                    groups.push(group);
                }
                None => {
                    self.current = None;
                    break;
                }
            }
        }

        if groups.is_empty() {
            return Ok(true);
        }

        let mut merged = Partition::concat(&groups)?;
        if let Some(columns) = &self.columns {
            merged = merged.select(columns.as_slice())?;
        }
        self.pending.extend(merged.chunks(self.part_size));
        Ok(true)
    }
}

impl Iterator for Partitions {
    type Item = Result<Partition>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(part) = self.pending.pop_front() {
                return Some(Ok(part));
            }
            match self.fill() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(error) => {
                    self.failed = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::device::MemoryConfig;
    use crate::io::{PartitionFileWriter, write_partition};

    fn device() -> DeviceContext {
        DeviceContext::initialize(MemoryConfig::new(1 << 30)).unwrap()
    }

    fn rows(start: i64, n: i64) -> Partition {
        Partition::new(vec![
            Column::int("id", (start..start + n).collect::<Vec<_>>()),
            Column::float("x", (start..start + n).map(|v| v as f64).collect::<Vec<_>>()),
        ])
        .unwrap()
    }

    #[test]
    fn test_shard_range_balanced() {
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
        assert_eq!(shard_range(1, 2, 3), 1..1);
    }

    #[test]
    fn test_partitions_bounded_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path().join("a.tfp"), &rows(0, 10)).unwrap();
        write_partition(dir.path().join("b.tfp"), &rows(10, 3)).unwrap();

        let dataset = Dataset::open(
            dir.path().to_str().unwrap(),
            &device(),
            ReaderOptions::new().with_part_size(4),
        )
        .unwrap();
        assert_eq!(dataset.num_rows().unwrap(), 13);

        let sizes: Vec<_> = dataset
            .partitions()
            .map(|p| p.unwrap().num_rows())
            .collect();
        assert_eq!(sizes, [4, 4, 2, 3]);

        let ids: Vec<i64> = dataset
            .partitions()
            .flat_map(|p| p.unwrap().require("id").unwrap().values().as_int().unwrap().to_vec())
            .collect();
        assert_eq!(ids, (0..13).collect::<Vec<_>>());
    }

    #[test]
    fn test_row_groups_coalesce_then_split() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            PartitionFileWriter::create(dir.path().join("a.tfp"), rows(0, 1).schema()).unwrap();
        for start in [0, 3, 6] {
            writer.append(&rows(start, 3)).unwrap();
        }
        writer.finish().unwrap();
        let mut writer =
            PartitionFileWriter::create(dir.path().join("b.tfp"), rows(0, 1).schema()).unwrap();
        for (start, n) in [(9, 5), (14, 0), (14, 1)] {
            writer.append(&rows(start, n)).unwrap();
        }
        writer.finish().unwrap();

        let dataset = Dataset::open(
            dir.path().to_str().unwrap(),
            &device(),
            ReaderOptions::new().with_part_size(4),
        )
        .unwrap();
        let sizes: Vec<_> = dataset
            .partitions()
            .map(|p| p.unwrap().num_rows())
            .collect();
        assert_eq!(sizes, [4, 2, 3, 4, 1, 1]);
        assert_eq!(dataset.partition_sizes(&[0, 1]).unwrap(), sizes);
        assert_eq!(dataset.partition_sizes(&[1]).unwrap(), [4, 1, 1]);
    }

    #[test]
    fn test_projection_and_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path().join("a.tfp"), &rows(0, 2)).unwrap();
        let pattern = dir.path().join("*.tfp");
        let pattern = pattern.to_str().unwrap();

        let dataset =
            Dataset::open(pattern, &device(), ReaderOptions::new().with_columns(["x"])).unwrap();
        let part = dataset.partitions().next().unwrap().unwrap();
        assert_eq!(part.column_names().collect::<Vec<_>>(), ["x"]);

        let error = Dataset::open(pattern, &device(), ReaderOptions::new().with_columns(["y"]))
            .unwrap_err();
        assert!(error.is_schema());
    }

    #[test]
    fn test_mismatched_schemas_fail_on_open() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path().join("a.tfp"), &rows(0, 2)).unwrap();
        let other = Partition::new(vec![Column::float("z", vec![1.0])]).unwrap();
        write_partition(dir.path().join("b.tfp"), &other).unwrap();

        let error =
            Dataset::open(dir.path().to_str().unwrap(), &device(), ReaderOptions::new()).unwrap_err();
        assert!(error.is_schema());
    }

    #[test]
    fn test_memory_derived_part_size() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path().join("a.tfp"), &rows(0, 2)).unwrap();
        let device = DeviceContext::initialize(MemoryConfig::new(1600).with_bytes(1600)).unwrap();

        let dataset = Dataset::open(
            dir.path().to_str().unwrap(),
            &device,
            ReaderOptions::new().with_part_mem_fraction(0.5),
        )
        .unwrap();
        // 800 budget bytes / 16 bytes per row
        assert_eq!(dataset.part_size(), 50);
    }

    #[test]
    fn test_no_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*.tfp");
        let error = Dataset::open(pattern.to_str().unwrap(), &device(), ReaderOptions::new())
            .unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::Io);
    }

    #[test]
    fn test_shard_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            write_partition(dir.path().join(format!("p{i}.tfp")), &rows(i, 1)).unwrap();
        }
        let dataset =
            Dataset::open(dir.path().to_str().unwrap(), &device(), ReaderOptions::new()).unwrap();
        assert_eq!(dataset.shard(0, 2).num_files(), 2);
        assert_eq!(dataset.shard(1, 2).num_files(), 1);
    }
}
