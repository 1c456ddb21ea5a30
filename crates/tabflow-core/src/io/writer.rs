//! Materializing partitions into output files.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use jiff::Timestamp;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::format::{FILE_EXTENSION, PartitionFileWriter, WrittenFile};
use crate::TRACING_TARGET_IO;
use crate::column::Schema;
use crate::error::{Error, Result};
use crate::partition::Partition;

/// Name of the metadata file written next to materialized partitions.
pub const METADATA_FILE: &str = "_metadata.json";

/// How output rows are shuffled before they reach a training loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Shuffle {
    /// Shuffle rows within each partition before splitting it across output
    /// files; input partitions are read in random order.
    PerPartition,
    /// Like `PerPartition`, and each output file is shuffled again once all
    /// of a worker's rows are buffered.
    PerWorker,
}

/// Options for a [`DatasetWriter`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOptions {
    /// Number of files each worker writes.
    pub out_files: usize,
    /// Row shuffling, if any.
    pub shuffle: Option<Shuffle>,
    /// Seed for shuffling.
    pub seed: u64,
    /// Dedicated threads appending to the output files. With `0` every
    /// append happens on the calling thread.
    pub num_io_threads: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            out_files: 1,
            shuffle: None,
            seed: 0,
            num_io_threads: 0,
        }
    }
}

/// Slices queued per IO thread before `write` blocks.
const IO_QUEUE_DEPTH: usize = 4;

/// Creates `dir` if needed and removes output of an earlier run from it.
///
/// Deletes `part_*` partition files and the metadata file; anything else in
/// the directory is left alone. Returns the number of files removed.
pub fn prepare_output_dir(dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io_at(dir, e))?;

    let mut removed = 0;
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io_at(dir, e))? {
        let path = entry.map_err(|e| Error::io_at(dir, e))?.path();
        if !path.is_file() || !is_output_file(&path) {
            continue;
        }
        std::fs::remove_file(&path).map_err(|e| Error::io_at(&path, e))?;
        removed += 1;
    }

    if removed > 0 {
        tracing::info!(
            target: TRACING_TARGET_IO,
            dir = %dir.display(),
            removed,
            "Removed earlier output"
        );
    }
    Ok(removed)
}

/// Returns true for files a [`DatasetWriter`] or [`DatasetMetadata`] writes.
pub fn is_output_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name == METADATA_FILE
        || (name.starts_with("part_")
            && path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION))
}

/// Writes the partitions of one worker into `out_files` files.
///
/// Each partition is split into `out_files` contiguous slices, one per file,
/// so every file receives a share of every partition. Files are named
/// `part_{worker}_{index}.tfp`.
#[derive(Debug)]
pub struct DatasetWriter {
    dir: PathBuf,
    worker_id: usize,
    options: WriterOptions,
    rng: StdRng,
    sink: Option<Sink>,
    buffered: Vec<Vec<Partition>>,
}

impl DatasetWriter {
    /// Creates the output directory if needed and prepares a writer.
    ///
    /// Existing files are not touched until the first write replaces this
    /// worker's files; see [`prepare_output_dir`] for clearing a directory.
    pub fn new(dir: impl Into<PathBuf>, worker_id: usize, options: WriterOptions) -> Result<Self> {
        if options.out_files == 0 {
            return Err(Error::configuration().with_message("out_files must be at least 1"));
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;

        // Distinct workers draw from distinct streams.
        let rng = StdRng::seed_from_u64(options.seed ^ (worker_id as u64).wrapping_mul(0x9e37_79b9));

        Ok(Self {
            dir,
            worker_id,
            rng,
            sink: None,
            buffered: vec![Vec::new(); options.out_files],
            options,
        })
    }

    /// Returns the path of output file `index`.
    pub fn file_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("part_{}_{}.{}", self.worker_id, index, FILE_EXTENSION))
    }

    fn sink(&mut self, schema: &Schema) -> Result<&mut Sink> {
        if self.sink.is_none() {
            let files = (0..self.options.out_files)
                .map(|i| PartitionFileWriter::create(self.file_path(i), schema.clone()))
                .collect::<Result<Vec<_>>>()?;
            let sink = match self.options.num_io_threads {
                0 => Sink::Inline(files),
                n => Sink::Threads(IoThreads::spawn(files, n, self.worker_id)?),
            };
            self.sink = Some(sink);
        }
        self.sink
            .as_mut()
            .ok_or_else(|| Error::internal().with_message("output files were not opened"))
    }

    /// Writes one partition.
    pub fn write(&mut self, part: &Partition) -> Result<()> {
        self.sink(&part.schema())?;

        let part = match self.options.shuffle {
            Some(_) => {
                let mut indices: Vec<usize> = (0..part.num_rows()).collect();
                indices.shuffle(&mut self.rng);
                part.take(&indices)
            }
            None => part.clone(),
        };

        let out_files = self.options.out_files;
        let per_file = part.num_rows().div_ceil(out_files).max(1);
        for (index, slice) in part.chunks(per_file).into_iter().enumerate() {
            match (self.options.shuffle, &mut self.sink) {
                (Some(Shuffle::PerWorker), _) => self.buffered[index].push(slice),
                (_, Some(sink)) => sink.append(index, slice)?,
                (_, None) => {}
            }
        }
        Ok(())
    }

    /// Flushes every file and returns their summaries.
    ///
    /// With [`Shuffle::PerWorker`] the buffered rows of each file are
    /// shuffled as a whole first. A writer that saw no partition writes no
    /// files.
    pub fn finish(mut self) -> Result<Vec<WrittenFile>> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(Vec::new());
        };

        if let Some(Shuffle::PerWorker) = self.options.shuffle {
            for (index, parts) in std::mem::take(&mut self.buffered).into_iter().enumerate() {
                if parts.is_empty() {
                    continue;
                }
                let merged = Partition::concat(&parts)?;
                let mut indices: Vec<usize> = (0..merged.num_rows()).collect();
                indices.shuffle(&mut self.rng);
                sink.append(index, merged.take(&indices))?;
            }
        }

        let written = sink.finish()?;
        tracing::debug!(
            target: TRACING_TARGET_IO,
            worker_id = self.worker_id,
            files = written.len(),
            io_threads = self.options.num_io_threads,
            rows = written.iter().map(|f| f.num_rows).sum::<usize>(),
            "Worker output written"
        );
        Ok(written)
    }
}

/// Destination of the slices of one worker.
#[derive(Debug)]
enum Sink {
    Inline(Vec<PartitionFileWriter>),
    Threads(IoThreads),
}

impl Sink {
    fn append(&mut self, index: usize, part: Partition) -> Result<()> {
        match self {
            Self::Inline(files) => files[index].append(&part),
            Self::Threads(threads) => threads.append(index, part),
        }
    }

    fn finish(self) -> Result<Vec<WrittenFile>> {
        match self {
            Self::Inline(files) => files.into_iter().map(PartitionFileWriter::finish).collect(),
            Self::Threads(threads) => threads.finish(),
        }
    }
}

type IoResult = Result<Vec<(usize, WrittenFile)>>;

/// Threads that each own a subset of the output files. File `i` belongs to
/// thread `i % threads`, so the slices of one file stay in order.
#[derive(Debug)]
struct IoThreads {
    senders: Vec<SyncSender<(usize, Partition)>>,
    handles: Vec<Option<JoinHandle<IoResult>>>,
}

impl IoThreads {
    fn spawn(files: Vec<PartitionFileWriter>, num_threads: usize, worker_id: usize) -> Result<Self> {
        let num_threads = num_threads.clamp(1, files.len().max(1));
        let mut owned: Vec<Vec<(usize, PartitionFileWriter)>> =
            (0..num_threads).map(|_| Vec::new()).collect();
        for (index, file) in files.into_iter().enumerate() {
            owned[index % num_threads].push((index, file));
        }

        let mut senders = Vec::with_capacity(num_threads);
        let mut handles = Vec::with_capacity(num_threads);
        for (thread, files) in owned.into_iter().enumerate() {
            let (tx, rx) = sync_channel(IO_QUEUE_DEPTH);
            let handle = std::thread::Builder::new()
                .name(format!("tabflow-io-{worker_id}-{thread}"))
                .spawn(move || append_until_closed(files, rx))
                .map_err(|e| Error::io().with_source(e))?;
            senders.push(tx);
            handles.push(Some(handle));
        }
        Ok(Self { senders, handles })
    }

    fn append(&mut self, index: usize, part: Partition) -> Result<()> {
        let thread = index % self.senders.len();
        if self.senders[thread].send((index, part)).is_ok() {
            return Ok(());
        }
        // The thread only hangs up after a failed append.
        match self.handles[thread].take().map(join) {
            Some(Err(error)) => Err(error),
            _ => Err(Error::internal().with_message("IO thread stopped early")),
        }
    }

    fn finish(self) -> Result<Vec<WrittenFile>> {
        drop(self.senders);
        let mut written = Vec::new();
        for handle in self.handles {
            let Some(handle) = handle else {
                return Err(Error::internal().with_message("IO thread stopped early"));
            };
            written.extend(join(handle)?);
        }
        written.sort_by_key(|(index, _)| *index);
        Ok(written.into_iter().map(|(_, file)| file).collect())
    }
}

fn join(handle: JoinHandle<IoResult>) -> IoResult {
    handle
        .join()
        .map_err(|_| Error::internal().with_message("IO thread panicked"))?
}

fn append_until_closed(
    mut files: Vec<(usize, PartitionFileWriter)>,
    rx: Receiver<(usize, Partition)>,
) -> IoResult {
    for (index, part) in rx {
        if let Some((_, file)) = files.iter_mut().find(|(i, _)| *i == index) {
            file.append(&part)?;
        }
    }
    files
        .into_iter()
        .map(|(index, file)| file.finish().map(|written| (index, written)))
        .collect()
}

/// Description of a materialized dataset, written as [`METADATA_FILE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// When the dataset was written.
    pub created_at: Timestamp,
    /// Files written, in worker order.
    pub files: Vec<WrittenFile>,
    /// Total rows written.
    pub num_rows: usize,
    /// Final categorical column names.
    pub categorical: Vec<String>,
    /// Final continuous column names.
    pub continuous: Vec<String>,
    /// Final label column names.
    pub label: Vec<String>,
}

impl DatasetMetadata {
    /// Writes the metadata into `dir`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| Error::io_at(&path, e))?;
        Ok(path)
    }

    /// Reads the metadata from `dir`.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        let json = std::fs::read(&path).map_err(|e| Error::io_at(&path, e))?;
        Ok(serde_json::from_slice(&json)?)
    }
}
