//! Partition file format.
//!
//! A partition file is JSON Lines. The first line is a [`FileHeader`]; every
//! following line is one row group holding all columns of a run of rows, in
//! schema order. Row groups can be appended while streaming, and the header
//! can be read without touching any data.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::float::StoredFloat;
use crate::column::{Column, ColumnValues, DType, Schema};
use crate::error::{Error, Result};
use crate::partition::Partition;

/// Format tag written in every header.
pub const FILE_FORMAT: &str = "tabflow-partition";

/// Current format version.
pub const FILE_VERSION: u32 = 1;

/// File extension of partition files.
pub const FILE_EXTENSION: &str = "tfp";

/// First line of a partition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Always [`FILE_FORMAT`].
    pub format: String,
    /// Format version.
    pub version: u32,
    /// Columns stored in the file.
    pub schema: Schema,
}

impl FileHeader {
    /// Creates a header for the given schema.
    pub fn new(schema: Schema) -> Self {
        Self {
            format: FILE_FORMAT.to_owned(),
            version: FILE_VERSION,
            schema,
        }
    }
}

/// Column values as stored on disk; floats use the [`float`](super::float)
/// encoding, so missing floats are `null`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
enum StoredValues {
    Float(Vec<StoredFloat>),
    Int(Vec<i64>),
    Str(Vec<Option<String>>),
}

impl StoredValues {
    fn dtype(&self) -> DType {
        match self {
            Self::Float(_) => DType::Float,
            Self::Int(_) => DType::Int,
            Self::Str(_) => DType::Str,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }
}

impl From<&ColumnValues> for StoredValues {
    fn from(values: &ColumnValues) -> Self {
        match values {
            ColumnValues::Float(v) => Self::Float(v.iter().copied().map(StoredFloat).collect()),
            ColumnValues::Int(v) => Self::Int(v.clone()),
            ColumnValues::Str(v) => Self::Str(v.clone()),
        }
    }
}

impl From<StoredValues> for ColumnValues {
    fn from(values: StoredValues) -> Self {
        match values {
            StoredValues::Float(v) => Self::Float(v.into_iter().map(|x| x.0).collect()),
            StoredValues::Int(v) => Self::Int(v),
            StoredValues::Str(v) => Self::Str(v),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RowGroup {
    num_rows: usize,
    columns: Vec<StoredValues>,
}

/// Only the row count of a row group, for counting without decoding values.
#[derive(Debug, Deserialize)]
struct RowGroupLen {
    num_rows: usize,
}

/// Summary of a finished partition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenFile {
    /// Path of the file.
    pub path: PathBuf,
    /// Rows written.
    pub num_rows: usize,
    /// Row groups written.
    pub row_groups: usize,
}

/// Appends row groups to a new partition file.
#[derive(Debug)]
pub struct PartitionFileWriter {
    path: PathBuf,
    schema: Schema,
    writer: BufWriter<File>,
    num_rows: usize,
    row_groups: usize,
}

impl PartitionFileWriter {
    /// Creates (or truncates) `path` and writes the header.
    pub fn create(path: impl Into<PathBuf>, schema: Schema) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| Error::io_at(&path, e))?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer(&mut writer, &FileHeader::new(schema.clone()))?;
        writer.write_all(b"\n").map_err(|e| Error::io_at(&path, e))?;

        Ok(Self {
            path,
            schema,
            writer,
            num_rows: 0,
            row_groups: 0,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the rows written so far.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Writes `part` as one row group. Empty partitions are skipped.
    pub fn append(&mut self, part: &Partition) -> Result<()> {
        if part.schema() != self.schema {
            return Err(Error::schema().with_message(format!(
                "partition schema does not match file {}",
                self.path.display()
            )));
        }
        if part.is_empty() {
            return Ok(());
        }

        let group = RowGroup {
            num_rows: part.num_rows(),
            columns: part
                .columns()
                .iter()
                .map(|c| StoredValues::from(c.values()))
                .collect(),
        };
        serde_json::to_writer(&mut self.writer, &group)?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| Error::io_at(&self.path, e))?;

        self.num_rows += part.num_rows();
        self.row_groups += 1;
        Ok(())
    }

    /// Flushes the file and returns its summary.
    pub fn finish(mut self) -> Result<WrittenFile> {
        self.writer
            .flush()
            .map_err(|e| Error::io_at(&self.path, e))?;
        Ok(WrittenFile {
            path: self.path,
            num_rows: self.num_rows,
            row_groups: self.row_groups,
        })
    }
}

/// Reads row groups from a partition file, one at a time.
#[derive(Debug)]
pub struct PartitionFileReader {
    path: PathBuf,
    header: FileHeader,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl PartitionFileReader {
    /// Opens `path` and parses its header.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| Error::io_at(&path, e))?;
        let mut lines = BufReader::new(file).lines();

        let first = lines
            .next()
            .ok_or_else(|| Error::malformed(&path, "missing header"))?
            .map_err(|e| Error::io_at(&path, e))?;
        let header: FileHeader =
            serde_json::from_str(&first).map_err(|e| Error::malformed(&path, e))?;

        if header.format != FILE_FORMAT {
            return Err(Error::malformed(
                &path,
                format!("unknown format `{}`", header.format),
            ));
        }
        if header.version != FILE_VERSION {
            return Err(Error::malformed(
                &path,
                format!("unsupported version {}", header.version),
            ));
        }

        Ok(Self {
            path,
            header,
            lines,
            line_no: 1,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the parsed header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Returns the file schema.
    pub fn schema(&self) -> &Schema {
        &self.header.schema
    }

    /// Reads the next row group, or `None` at end of file.
    pub fn next_row_group(&mut self) -> Result<Option<Partition>> {
        let Some(line) = self.lines.next() else {
            return Ok(None);
        };
        let line = line.map_err(|e| Error::io_at(&self.path, e))?;
        self.line_no += 1;

        if line.trim().is_empty() {
            return self.next_row_group();
        }

        let group: RowGroup = serde_json::from_str(&line)
            .map_err(|e| Error::malformed(&self.path, format!("line {}: {e}", self.line_no)))?;
        self.decode(group).map(Some)
    }

    fn decode(&self, group: RowGroup) -> Result<Partition> {
        let fields = self.header.schema.fields();
        if group.columns.len() != fields.len() {
            return Err(Error::malformed(
                &self.path,
                format!(
                    "line {}: {} columns, header declares {}",
                    self.line_no,
                    group.columns.len(),
                    fields.len()
                ),
            ));
        }

        let mut columns = Vec::with_capacity(fields.len());
        for (field, stored) in fields.iter().zip(group.columns) {
            if stored.dtype() != field.dtype || stored.len() != group.num_rows {
                return Err(Error::malformed(
                    &self.path,
                    format!(
                        "line {}: column `{}` is {} x {}, expected {} x {}",
                        self.line_no,
                        field.name,
                        stored.dtype(),
                        stored.len(),
                        field.dtype,
                        group.num_rows
                    ),
                ));
            }
            columns.push(Column::new(field.name.clone(), stored.into()));
        }

        Partition::new(columns)
    }
}

impl Iterator for PartitionFileReader {
    type Item = Result<Partition>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row_group().transpose()
    }
}

/// Reads only the header of a partition file.
pub fn read_header(path: impl AsRef<Path>) -> Result<FileHeader> {
    PartitionFileReader::open(path.as_ref()).map(|r| r.header)
}

/// Counts the rows of a partition file without decoding values.
pub fn count_rows(path: impl AsRef<Path>) -> Result<usize> {
    Ok(row_group_sizes(path)?.into_iter().sum())
}

/// Returns the row count of every row group of a file, in file order,
/// without reading column data.
pub fn row_group_sizes(path: impl AsRef<Path>) -> Result<Vec<usize>> {
    let path = path.as_ref();
    let mut reader = PartitionFileReader::open(path)?;
    let mut sizes = Vec::new();

    for line in reader.lines.by_ref() {
        let line = line.map_err(|e| Error::io_at(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let group: RowGroupLen =
            serde_json::from_str(&line).map_err(|e| Error::malformed(path, e))?;
        sizes.push(group.num_rows);
    }

    Ok(sizes)
}

/// Writes a whole partition to a new file as a single row group.
pub fn write_partition(path: impl Into<PathBuf>, part: &Partition) -> Result<WrittenFile> {
    let mut writer = PartitionFileWriter::create(path, part.schema())?;
    writer.append(part)?;
    writer.finish()
}

/// Reads every row group of a file into one partition.
pub fn read_partition(path: impl Into<PathBuf>) -> Result<Partition> {
    let reader = PartitionFileReader::open(path)?;
    let groups = reader.collect::<Result<Vec<_>>>()?;
    Partition::concat(&groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Partition {
        Partition::new(vec![
            Column::float("Age", vec![1.0, f64::NAN, 24.0]),
            Column::str("Type", ["Cat", "Dog", "Cat"]),
            Column::int("AdoptionSpeed", vec![4, 2, 0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_missing_floats_survive_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.tfp");
        write_partition(&path, &sample()).unwrap();

        let read = read_partition(&path).unwrap();
        let ages = read.require("Age").unwrap().values().as_float().unwrap().to_vec();
        assert_eq!(ages[0], 1.0);
        assert!(ages[1].is_nan());
        assert_eq!(read.num_rows(), 3);
    }

    #[test]
    fn test_floats_survive_the_file_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.tfp");
        let values: Vec<f64> = (1..500)
            .map(|i| (f64::from(i) * 0.37).sin() / 7.0)
            .chain([
                0.9445839741280897,
                1.3672482676995847e-95,
                f64::INFINITY,
                f64::NEG_INFINITY,
                f64::MAX,
            ])
            .collect();
        let part = Partition::new(vec![Column::float("x", values.clone())]).unwrap();
        write_partition(&path, &part).unwrap();

        let read = read_partition(&path).unwrap();
        let stored = read.require("x").unwrap().values().as_float().unwrap();
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(stored), bits(&values));
    }

    #[test]
    fn test_appended_row_groups_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.tfp");
        let mut writer = PartitionFileWriter::create(&path, sample().schema()).unwrap();
        writer.append(&sample()).unwrap();
        writer.append(&sample().slice(0..1)).unwrap();
        let written = writer.finish().unwrap();

        assert_eq!(written.num_rows, 4);
        assert_eq!(written.row_groups, 2);
        assert_eq!(count_rows(&path).unwrap(), 4);
        assert_eq!(read_header(&path).unwrap().schema, sample().schema());
    }

    #[test]
    fn test_append_rejects_other_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            PartitionFileWriter::create(dir.path().join("p.tfp"), sample().schema()).unwrap();
        let other = Partition::new(vec![Column::float("Fee", vec![1.0])]).unwrap();
        assert!(writer.append(&other).unwrap_err().is_schema());
    }

    #[test]
    fn test_corrupt_row_group_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.tfp");
        write_partition(&path, &sample()).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        let error = read_partition(&path).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::Io);
        assert!(error.to_string().contains("malformed"));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.tfp");
        std::fs::write(&path, "{\"format\":\"csv\",\"version\":1,\"schema\":[]}\n").unwrap();
        assert!(PartitionFileReader::open(&path).is_err());
    }
}
