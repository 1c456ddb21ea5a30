//! Partition file I/O.
//!
//! - [`Dataset`]: a glob of partition files streamed as bounded partitions
//! - [`DatasetWriter`]: per-worker output with optional shuffling
//! - [`PartitionFileReader`] / [`PartitionFileWriter`]: the file format
//! - [`float`]: lossless float encoding shared by every JSON artifact

pub mod float;

mod format;
mod glob;
mod reader;
mod writer;

pub use format::{
    FILE_EXTENSION, FILE_FORMAT, FILE_VERSION, FileHeader, PartitionFileReader,
    PartitionFileWriter, WrittenFile, count_rows, read_header, read_partition, row_group_sizes,
    write_partition,
};
pub use glob::FilePattern;
pub use reader::{
    DEFAULT_PART_MEM_FRACTION, Dataset, Partitions, ReaderOptions, shard_range,
};
pub use writer::{
    DatasetMetadata, DatasetWriter, METADATA_FILE, Shuffle, WriterOptions, is_output_file,
    prepare_output_dir,
};
