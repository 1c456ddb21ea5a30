//! Declarative feature columns and their row-wise evaluation.

use serde::{Deserialize, Serialize};
use tabflow_core::{ColumnValues, Partition};

use crate::error::{RuntimeError, RuntimeResult};
use crate::ops::{CROSS_SEPARATOR, bucket, cross_token, token_at};

/// A feature column as declared by a model's input layer.
///
/// Categorical variants produce integer codes, `Numeric` produces floats,
/// and `Embedding`/`Indicator` wrap a categorical column without changing
/// its codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureColumn {
    /// A raw numeric column.
    Numeric {
        /// Input column.
        key: String,
        /// Values per row; only scalars are supported.
        #[serde(default = "default_shape")]
        shape: usize,
        /// Replacement for missing values.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<f64>,
    },
    /// A numeric column split into ranges.
    Bucketized {
        /// Numeric source column.
        source: Box<FeatureColumn>,
        /// Strictly increasing boundaries.
        boundaries: Vec<f64>,
    },
    /// Tokens looked up in a fixed list.
    Vocabulary {
        /// Input column.
        key: String,
        /// Known tokens; codes follow list order.
        vocabulary: Vec<String>,
        /// Buckets for tokens outside the list.
        #[serde(default)]
        num_oov_buckets: u64,
        /// Code for tokens outside the list when there are no buckets.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<i64>,
    },
    /// Tokens hashed into buckets.
    HashBucket {
        /// Input column.
        key: String,
        /// Number of buckets.
        hash_bucket_size: u64,
    },
    /// Integer values used as their own codes.
    Identity {
        /// Input column.
        key: String,
        /// Values in `0..num_buckets` are kept.
        num_buckets: u64,
        /// Code for values out of range.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<i64>,
    },
    /// Several categorical inputs hashed together.
    Crossed {
        /// Raw column names or categorical feature columns.
        keys: Vec<CrossKey>,
        /// Number of buckets.
        hash_bucket_size: u64,
    },
    /// A categorical column fed to an embedding.
    Embedding {
        /// Underlying categorical column.
        categorical: Box<FeatureColumn>,
        /// Embedding width.
        dimension: usize,
    },
    /// A categorical column fed as a one-hot vector.
    Indicator {
        /// Underlying categorical column.
        categorical: Box<FeatureColumn>,
    },
}

fn default_shape() -> usize {
    1
}

/// One input of a crossed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CrossKey {
    /// A raw column, crossed on its tokens.
    Name(String),
    /// A categorical feature column, crossed on its codes.
    Column(FeatureColumn),
}

impl CrossKey {
    /// Returns the name this key contributes to the cross name.
    pub fn name(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Column(column) => column.name(),
        }
    }
}

impl From<&str> for CrossKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<FeatureColumn> for CrossKey {
    fn from(column: FeatureColumn) -> Self {
        Self::Column(column)
    }
}

/// Value of one feature for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    /// A numeric value; NaN is missing.
    Continuous(f64),
    /// A categorical code.
    Categorical(i64),
}

impl FeatureColumn {
    /// Creates a numeric column.
    pub fn numeric(key: impl Into<String>) -> Self {
        Self::Numeric {
            key: key.into(),
            shape: 1,
            default_value: None,
        }
    }

    /// Creates a bucketized column over a numeric one.
    pub fn bucketized(source: FeatureColumn, boundaries: impl Into<Vec<f64>>) -> Self {
        Self::Bucketized {
            source: Box::new(source),
            boundaries: boundaries.into(),
        }
    }

    /// Creates a vocabulary column without out-of-vocabulary buckets.
    pub fn vocabulary<I, S>(key: impl Into<String>, vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Vocabulary {
            key: key.into(),
            vocabulary: vocabulary.into_iter().map(Into::into).collect(),
            num_oov_buckets: 0,
            default_value: None,
        }
    }

    /// Creates a crossed column.
    pub fn crossed<I, K>(keys: I, hash_bucket_size: u64) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<CrossKey>,
    {
        Self::Crossed {
            keys: keys.into_iter().map(Into::into).collect(),
            hash_bucket_size,
        }
    }

    /// Wraps the column in an embedding.
    pub fn embedding(self, dimension: usize) -> Self {
        Self::Embedding {
            categorical: Box::new(self),
            dimension,
        }
    }

    /// Wraps the column in an indicator.
    pub fn indicator(self) -> Self {
        Self::Indicator {
            categorical: Box::new(self),
        }
    }

    /// Returns the feature name.
    pub fn name(&self) -> String {
        match self {
            Self::Numeric { key, .. }
            | Self::Vocabulary { key, .. }
            | Self::HashBucket { key, .. }
            | Self::Identity { key, .. } => key.clone(),
            Self::Bucketized { source, .. } => format!("{}_bucketized", source.name()),
            Self::Crossed { keys, .. } => keys
                .iter()
                .map(CrossKey::name)
                .collect::<Vec<_>>()
                .join(CROSS_SEPARATOR),
            Self::Embedding { categorical, .. } => format!("{}_embedding", categorical.name()),
            Self::Indicator { categorical } => format!("{}_indicator", categorical.name()),
        }
    }

    /// Returns true if the column produces integer codes.
    pub fn is_categorical(&self) -> bool {
        !matches!(self, Self::Numeric { .. })
    }

    /// Evaluates the feature for one row of raw data.
    ///
    /// This is the reference semantics a translated workflow must
    /// reproduce.
    pub fn apply_row(&self, part: &Partition, row: usize) -> RuntimeResult<FeatureValue> {
        let value = match self {
            Self::Numeric {
                key, default_value, ..
            } => {
                let x = match raw(part, key)? {
                    ColumnValues::Float(v) => v[row],
                    ColumnValues::Int(v) => v[row] as f64,
                    ColumnValues::Str(_) => return Err(self.untranslatable("holds strings")),
                };
                match default_value {
                    Some(default) if x.is_nan() => FeatureValue::Continuous(*default),
                    _ => FeatureValue::Continuous(x),
                }
            }

            Self::Bucketized { source, boundaries } => {
                let FeatureValue::Continuous(x) = source.apply_row(part, row)? else {
                    return Err(self.untranslatable("source is not numeric"));
                };
                FeatureValue::Categorical(boundaries.iter().filter(|b| **b <= x).count() as i64)
            }

            Self::Vocabulary {
                key,
                vocabulary,
                num_oov_buckets,
                default_value,
            } => {
                let token = token_at(raw(part, key)?, row);
                let known = token
                    .as_deref()
                    .and_then(|t| vocabulary.iter().position(|v| v == t));
                let n = vocabulary.len() as i64;
                FeatureValue::Categorical(match (known, default_value, num_oov_buckets) {
                    (Some(code), _, _) => code as i64,
                    (None, Some(default), _) => *default,
                    (None, None, 0) => -1,
                    (None, None, 1) => n,
                    (None, None, k) => n + bucket(token.as_deref().unwrap_or_default(), *k),
                })
            }

            Self::HashBucket {
                key,
                hash_bucket_size,
            } => {
                let values = raw(part, key)?;
                if matches!(values, ColumnValues::Float(_)) {
                    return Err(self.untranslatable("holds floats"));
                }
                let token = token_at(values, row).unwrap_or_default();
                FeatureValue::Categorical(bucket(&token, *hash_bucket_size))
            }

            Self::Identity {
                key,
                num_buckets,
                default_value,
            } => {
                let token = token_at(raw(part, key)?, row);
                let id = token.as_deref().and_then(|t| {
                    t.parse::<u64>()
                        .ok()
                        .filter(|id| *id < *num_buckets && id.to_string() == t)
                });
                FeatureValue::Categorical(match id {
                    Some(id) => id as i64,
                    None => default_value.unwrap_or(-1),
                })
            }

            Self::Crossed {
                keys,
                hash_bucket_size,
            } => {
                let mut tokens = Vec::with_capacity(keys.len());
                for key in keys {
                    tokens.push(match key {
                        CrossKey::Name(name) => token_at(raw(part, name)?, row),
                        CrossKey::Column(column) => match column.apply_row(part, row)? {
                            FeatureValue::Categorical(code) => Some(code.to_string()),
                            FeatureValue::Continuous(_) => {
                                return Err(self.untranslatable("crosses a numeric column"));
                            }
                        },
                    });
                }
                let token = cross_token(tokens.iter().map(Option::as_deref));
                FeatureValue::Categorical(bucket(&token, *hash_bucket_size))
            }

            Self::Embedding { categorical, .. } | Self::Indicator { categorical } => {
                categorical.apply_row(part, row)?
            }
        };
        Ok(value)
    }

    pub(crate) fn untranslatable(&self, reason: impl Into<String>) -> RuntimeError {
        RuntimeError::UntranslatableFeature {
            feature: self.name(),
            reason: reason.into(),
        }
    }
}

fn raw<'a>(part: &'a Partition, key: &str) -> RuntimeResult<&'a ColumnValues> {
    part.column(key)
        .map(|c| c.values())
        .ok_or_else(|| RuntimeError::unknown_column(key, "the reference row"))
}
