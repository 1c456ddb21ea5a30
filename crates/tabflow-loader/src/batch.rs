//! Batches of model inputs.

use std::collections::BTreeMap;

use tabflow_core::{ColumnKind, ColumnManifest, ColumnValues, DType, Partition};

use crate::error::{LoaderError, LoaderResult};

/// Values of a [`Tensor`], row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// Continuous features.
    F32(Vec<f32>),
    /// Categorical codes and labels.
    I64(Vec<i64>),
}

/// A dense `rows × width` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: TensorData,
    rows: usize,
    width: usize,
}

impl Tensor {
    /// Creates a float tensor with one value per row.
    pub fn f32(values: Vec<f32>) -> Self {
        let rows = values.len();
        Self {
            data: TensorData::F32(values),
            rows,
            width: 1,
        }
    }

    /// Creates an integer tensor with one value per row.
    pub fn i64(values: Vec<i64>) -> Self {
        let rows = values.len();
        Self {
            data: TensorData::I64(values),
            rows,
            width: 1,
        }
    }

    /// Returns the number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns the number of values per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the values.
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Returns the values of a float tensor.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            TensorData::I64(_) => None,
        }
    }

    /// Returns the values of an integer tensor.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::I64(v) => Some(v),
            TensorData::F32(_) => None,
        }
    }

    /// Returns every value as `f32`.
    pub fn to_f32(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(v) => v.clone(),
            TensorData::I64(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }
}

/// A batch of rows, one tensor per feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    tensors: BTreeMap<String, Tensor>,
    num_rows: usize,
}

impl Batch {
    /// Converts the columns of `part` named in `features`.
    ///
    /// Continuous columns become `f32` tensors; categorical and label
    /// columns become `i64` tensors.
    pub fn from_partition(part: &Partition, features: &ColumnManifest) -> LoaderResult<Self> {
        let mut tensors = BTreeMap::new();
        for name in features.all() {
            let column = part.column(name).ok_or_else(|| LoaderError::missing(name))?;
            let tensor = match features.kind_of(name) {
                Some(ColumnKind::Continuous) => {
                    let values = match column.values() {
                        ColumnValues::Str(_) => column.values().cast(DType::Float)?,
                        values => values.clone(),
                    };
                    let values = values.to_f64().unwrap_or_default();
                    Tensor::f32(values.into_iter().map(|x| x as f32).collect())
                }
                _ => {
                    let values = column.values().cast(DType::Int)?;
                    Tensor::i64(values.as_int().map(<[i64]>::to_vec).unwrap_or_default())
                }
            };
            tensors.insert(name.to_owned(), tensor);
        }

        Ok(Self {
            tensors,
            num_rows: part.num_rows(),
        })
    }

    /// Returns the number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns true if the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Returns a feature's tensor.
    pub fn get(&self, feature: &str) -> Option<&Tensor> {
        self.tensors.get(feature)
    }

    /// Returns a feature's tensor or a missing-feature error.
    pub fn require(&self, feature: &str) -> LoaderResult<&Tensor> {
        self.get(feature).ok_or_else(|| LoaderError::missing(feature))
    }

    /// Iterates over features in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.tensors.iter().map(|(name, tensor)| (name.as_str(), tensor))
    }
}

#[cfg(test)]
mod tests {
    use tabflow_core::Column;

    use super::*;

    #[test]
    fn test_from_partition() {
        let part = Partition::new(vec![
            Column::float("Age", vec![0.25, f64::NAN]),
            Column::int("Type", vec![0, 2]),
            Column::float("AdoptionSpeed", vec![1.0, 0.0]),
            Column::str("Description", ["a", "b"]),
        ])
        .unwrap();
        let features = ColumnManifest::new()
            .with_continuous(["Age"])
            .with_categorical(["Type"])
            .with_label(["AdoptionSpeed"]);

        let batch = Batch::from_partition(&part, &features).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.iter().count(), 3);
        assert!(batch.get("Description").is_none());

        let age = batch.require("Age").unwrap().as_f32().unwrap();
        assert_eq!(age[0], 0.25);
        assert!(age[1].is_nan());
        assert_eq!(batch.require("Type").unwrap().as_i64().unwrap(), [0, 2]);
        assert_eq!(batch.require("AdoptionSpeed").unwrap().as_i64().unwrap(), [1, 0]);
        assert!(matches!(
            batch.require("Fee").unwrap_err(),
            LoaderError::MissingFeature { .. }
        ));
    }

    #[test]
    fn test_unencoded_categorical() {
        let part = Partition::new(vec![Column::str("Type", ["Cat"])]).unwrap();
        let features = ColumnManifest::new().with_categorical(["Type"]);
        let error = Batch::from_partition(&part, &features).unwrap_err();
        assert_eq!(error.kind(), tabflow_core::ErrorKind::Schema);
    }
}
