//! Typed columns.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};

/// 2^63, the first float above the `i64` range.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Physical type of a column's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 64-bit floats; NaN marks a missing value.
    Float,
    /// 64-bit signed integers, used for encoded categories and labels.
    Int,
    /// Optional strings, used for raw categorical tokens.
    Str,
}

impl DType {
    /// Rough in-memory size of one value, used to size partitions.
    pub const fn estimated_width(self) -> usize {
        match self {
            Self::Float | Self::Int => 8,
            Self::Str => 32,
        }
    }
}

/// Values of a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    /// Continuous values.
    Float(Vec<f64>),
    /// Integer values.
    Int(Vec<i64>),
    /// String tokens; `None` is a missing value.
    Str(Vec<Option<String>>),
}

impl ColumnValues {
    /// Creates an empty value vector of the given type.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Float => Self::Float(Vec::new()),
            DType::Int => Self::Int(Vec::new()),
            DType::Str => Self::Str(Vec::new()),
        }
    }

    /// Returns the physical type.
    pub fn dtype(&self) -> DType {
        match self {
            Self::Float(_) => DType::Float,
            Self::Int(_) => DType::Int,
            Self::Str(_) => DType::Str,
        }
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    /// Returns true if there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gathers the values at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Self {
        match self {
            Self::Float(v) => Self::Float(indices.iter().map(|&i| v[i]).collect()),
            Self::Int(v) => Self::Int(indices.iter().map(|&i| v[i]).collect()),
            Self::Str(v) => Self::Str(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// Copies a contiguous range of values.
    pub fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Self::Float(v) => Self::Float(v[range].to_vec()),
            Self::Int(v) => Self::Int(v[range].to_vec()),
            Self::Str(v) => Self::Str(v[range].to_vec()),
        }
    }

    /// Appends `other`, which must have the same type.
    pub fn extend_from(&mut self, other: &Self) -> Result<()> {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.extend_from_slice(b),
            (Self::Int(a), Self::Int(b)) => a.extend_from_slice(b),
            (Self::Str(a), Self::Str(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(Error::schema().with_message(format!(
                    "cannot append {} values to a {} column",
                    b.dtype(),
                    a.dtype()
                )));
            }
        }
        Ok(())
    }

    /// Converts the values to another physical type.
    ///
    /// Missing values become NaN or `None`. Floats round to the nearest
    /// integer; a NaN, an infinity, a float outside the `i64` range or a
    /// string that does not parse is a schema error.
    pub fn cast(&self, dtype: DType) -> Result<Self> {
        let cast = match (self, dtype) {
            (values, target) if values.dtype() == target => values.clone(),
            (Self::Int(v), DType::Float) => Self::Float(v.iter().map(|&x| x as f64).collect()),
            (Self::Int(v), DType::Str) => Self::Str(v.iter().map(|x| Some(x.to_string())).collect()),
            (Self::Float(v), DType::Int) => Self::Int(
                v.iter()
                    .map(|&x| {
                        let rounded = x.round();
                        if (-I64_BOUND..I64_BOUND).contains(&rounded) {
                            Ok(rounded as i64)
                        } else {
                            Err(Error::schema()
                                .with_message(format!("cannot cast {x} to an integer")))
                        }
                    })
                    .collect::<Result<_>>()?,
            ),
            (Self::Float(v), DType::Str) => Self::Str(
                v.iter()
                    .map(|&x| (!x.is_nan()).then(|| x.to_string()))
                    .collect(),
            ),
            (Self::Str(v), DType::Float) => Self::Float(
                v.iter()
                    .map(|x| match x {
                        None => Ok(f64::NAN),
                        Some(s) => s.trim().parse::<f64>().map_err(|_| {
                            Error::schema().with_message(format!("cannot cast {s:?} to a float"))
                        }),
                    })
                    .collect::<Result<_>>()?,
            ),
            (Self::Str(v), DType::Int) => Self::Int(
                v.iter()
                    .map(|x| {
                        x.as_deref()
                            .and_then(|s| s.trim().parse::<i64>().ok())
                            .ok_or_else(|| {
                                Error::schema()
                                    .with_message(format!("cannot cast {x:?} to an integer"))
                            })
                    })
                    .collect::<Result<_>>()?,
            ),
            (values, target) => {
                return Err(Error::internal().with_message(format!(
                    "unhandled cast from {} to {}",
                    values.dtype(),
                    target
                )));
            }
        };
        Ok(cast)
    }

    /// Returns the float values, if this is a float column.
    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integer values, if this is an integer column.
    pub fn as_int(&self) -> Option<&[i64]> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string values, if this is a string column.
    pub fn as_str(&self) -> Option<&[Option<String>]> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Returns numeric values as floats; integers are widened.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Self::Float(v) => Some(v.clone()),
            Self::Int(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Self::Str(_) => None,
        }
    }

    /// Rough in-memory size of the values.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            Self::Float(v) => v.len() * 8,
            Self::Int(v) => v.len() * 8,
            Self::Str(v) => v
                .iter()
                .map(|s| std::mem::size_of::<Option<String>>() + s.as_ref().map_or(0, String::len))
                .sum(),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    values: ColumnValues,
}

impl Column {
    /// Creates a column from a name and values.
    pub fn new(name: impl Into<String>, values: ColumnValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Creates a float column.
    pub fn float(name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        Self::new(name, ColumnValues::Float(values.into()))
    }

    /// Creates an integer column.
    pub fn int(name: impl Into<String>, values: impl Into<Vec<i64>>) -> Self {
        Self::new(name, ColumnValues::Int(values.into()))
    }

    /// Creates a string column with no missing values.
    pub fn str<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(|s| Some(s.into())).collect();
        Self::new(name, ColumnValues::Str(values))
    }

    /// Returns the column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the column values.
    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    /// Consumes the column and returns its values.
    pub fn into_values(self) -> ColumnValues {
        self.values
    }

    /// Returns the physical type.
    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the column has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a copy of this column under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self::new(name, self.values.clone())
    }
}

/// Name and type of a column, without values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Column type.
    pub dtype: DType,
}

impl Field {
    /// Creates a new field.
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Ordered list of fields describing a partition or a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates a schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Returns the fields in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if a field with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterates over field names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Rough in-memory size of one row.
    pub fn estimated_row_bytes(&self) -> usize {
        self.fields.iter().map(|f| f.dtype.estimated_width()).sum()
    }
}
