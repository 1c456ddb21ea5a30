//! Row partitions, the unit of streaming I/O.

use std::collections::HashSet;
use std::ops::Range;

use crate::column::{Column, ColumnValues, DType, Field, Schema};
use crate::error::{Error, Result};

/// An immutable, ordered batch of rows over a fixed column set.
///
/// All columns have the same length and column names are unique. Methods
/// that change the column set return a new partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Partition {
    /// Creates a partition, checking lengths and name uniqueness.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, Column::len);
        let mut seen = HashSet::with_capacity(columns.len());

        for column in &columns {
            if column.len() != num_rows {
                return Err(Error::schema().with_message(format!(
                    "column `{}` has {} rows, expected {}",
                    column.name(),
                    column.len(),
                    num_rows
                )));
            }
            if !seen.insert(column.name()) {
                return Err(Error::schema()
                    .with_message(format!("duplicate column `{}`", column.name())));
            }
        }

        Ok(Self { columns, num_rows })
    }

    /// Returns the number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns the number of columns.
    #[inline]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the partition has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Returns the columns in order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Consumes the partition and returns its columns.
    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    /// Iterates over column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(Column::name)
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Looks up a column by name, failing with a schema error if absent.
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| Error::schema().with_message(format!("column `{name}` not found")))
    }

    /// Returns the partition schema.
    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.name(), c.dtype()))
                .collect(),
        )
    }

    /// Returns a partition with `column` replacing the same-named column, or
    /// appended if no such column exists.
    pub fn with_column(mut self, column: Column) -> Result<Self> {
        if !self.columns.is_empty() && column.len() != self.num_rows {
            return Err(Error::schema().with_message(format!(
                "column `{}` has {} rows, expected {}",
                column.name(),
                column.len(),
                self.num_rows
            )));
        }

        if self.columns.is_empty() {
            self.num_rows = column.len();
        }

        match self.columns.iter_mut().find(|c| c.name() == column.name()) {
            Some(slot) => *slot = column,
            None => self.columns.push(column),
        }
        Ok(self)
    }

    /// Returns a partition with only the named columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let columns = names
            .iter()
            .map(|name| self.require(name.as_ref()).cloned())
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    /// Gathers rows by index, in the order given.
    pub fn take(&self, indices: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name(), c.values().take(indices)))
            .collect();
        Self {
            columns,
            num_rows: indices.len(),
        }
    }

    /// Copies a contiguous range of rows.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let num_rows = range.len();
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name(), c.values().slice(range.clone())))
            .collect();
        Self { columns, num_rows }
    }

    /// Splits the partition into consecutive chunks of at most `rows` rows.
    pub fn chunks(&self, rows: usize) -> Vec<Self> {
        let rows = rows.max(1);
        (0..self.num_rows)
            .step_by(rows)
            .map(|start| self.slice(start..(start + rows).min(self.num_rows)))
            .collect()
    }

    /// Concatenates partitions with identical schemas, in order.
    pub fn concat(parts: &[Self]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Ok(Self::default());
        };

        let schema = first.schema();
        let mut values: Vec<ColumnValues> = first
            .columns
            .iter()
            .map(|c| ColumnValues::empty(c.dtype()))
            .collect();

        for part in parts {
            if part.schema() != schema {
                return Err(Error::schema()
                    .with_message("cannot concatenate partitions with different schemas"));
            }
            for (acc, column) in values.iter_mut().zip(&part.columns) {
                acc.extend_from(column.values())?;
            }
        }

        let columns = schema
            .fields()
            .iter()
            .zip(values)
            .map(|(field, values)| Column::new(field.name.clone(), values))
            .collect();
        Self::new(columns)
    }

    /// Casts the named columns to new types.
    pub fn cast<'a, I>(self, dtypes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, DType)>,
    {
        let mut part = self;
        for (name, dtype) in dtypes {
            let column = part.require(name)?;
            if column.dtype() == dtype {
                continue;
            }
            let cast = Column::new(name, column.values().cast(dtype)?);
            part = part.with_column(cast)?;
        }
        Ok(part)
    }

    /// Rough in-memory size of the partition.
    pub fn estimated_bytes(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.values().estimated_bytes())
            .sum()
    }
}
