//! Preprocessing operators.
//!
//! An [`Operator`] is a serializable description of one column
//! transformation. Stateless operators map values row by row; stateful
//! operators ([`Operator::is_stateful`]) need a [`Statistic`] collected by a
//! fit pass before they can be applied.

mod apply;
mod hash;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use tabflow_core::{ColumnKind, DType};

pub(crate) use self::apply::{apply_column, apply_cross};
pub use self::hash::{
    CROSS_SEPARATOR, MAX_BUCKETS, bucket, cross_token, float_token, stable_hash, token_at,
};
use crate::stats::{Accumulator, Statistic, Vocabulary};

/// Default reservoir size used to estimate medians.
pub const DEFAULT_MEDIAN_SAMPLE_SIZE: usize = 100_000;

/// Position of an operator in a workflow: step index and index within the
/// step's operator chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, Serialize, Deserialize)]
#[display("{step}.{op}")]
pub struct OperatorId {
    /// Step index.
    pub step: usize,
    /// Operator index within the step.
    pub op: usize,
}

impl OperatorId {
    /// Creates an operator id.
    #[inline]
    pub const fn new(step: usize, op: usize) -> Self {
        Self { step, op }
    }
}

/// Replacement for missing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    /// A number, used for numeric columns (and rendered as a token for
    /// string columns).
    Number(f64),
    /// A token, used for string columns.
    Text(String),
}

/// Code assignment for values outside a categorical vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Oov {
    /// Known tokens get `0..n` and unseen or missing values get `n`.
    #[default]
    Append,
    /// Unseen or missing values get `0` and known tokens `1..=n`.
    Reserved,
    /// Unseen or missing values get a fixed code.
    Code(i64),
    /// Unseen or missing values are hashed into `n..n + buckets`.
    Buckets(u64),
}

impl Oov {
    /// Number of distinct codes for a vocabulary of `known` tokens.
    pub fn cardinality(self, known: usize) -> u64 {
        let known = known as u64;
        match self {
            Self::Append | Self::Reserved => known + 1,
            Self::Code(_) => known,
            Self::Buckets(buckets) => known + buckets,
        }
    }

    /// Encodes one token.
    pub fn encode(self, vocabulary: &Vocabulary, token: Option<&str>) -> i64 {
        let known = token.and_then(|t| vocabulary.code(t));
        match (self, known) {
            (Self::Reserved, Some(code)) => code + 1,
            (_, Some(code)) => code,
            (Self::Append, None) => vocabulary.len() as i64,
            (Self::Reserved, None) => 0,
            (Self::Code(code), None) => code,
            (Self::Buckets(buckets), None) => {
                (vocabulary.len() as i64).saturating_add(bucket(token.unwrap_or_default(), buckets))
            }
        }
    }
}

fn check_buckets(name: &str, buckets: u64) -> Result<(), String> {
    match buckets {
        0 => Err(format!("{name} must be at least 1")),
        n if n > MAX_BUCKETS => Err(format!("{name} must be at most {MAX_BUCKETS}")),
        _ => Ok(()),
    }
}

/// A programmatic numeric transformation.
///
/// Lambdas exist only in the Rust API: a workflow containing one cannot be
/// serialized.
#[derive(Clone)]
pub struct LambdaFn {
    name: String,
    f: Arc<dyn Fn(f64) -> f64 + Send + Sync>,
}

impl LambdaFn {
    /// Wraps a function under a descriptive name.
    pub fn new(name: impl Into<String>, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the function.
    #[inline]
    pub fn call(&self, x: f64) -> f64 {
        (self.f)(x)
    }
}

impl fmt::Debug for LambdaFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LambdaFn").field(&self.name).finish()
    }
}

impl PartialEq for LambdaFn {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.f, &other.f)
    }
}

/// A column transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[derive(IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operator {
    /// Replaces missing values with a constant.
    FillMissing {
        /// Replacement value.
        value: FillValue,
    },
    /// Replaces missing values with the column median.
    FillMedian {
        /// Reservoir size used to estimate the median.
        #[serde(default = "default_sample_size")]
        sample_size: usize,
    },
    /// Clamps values to `[min, max]`.
    Clip {
        /// Lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        /// Upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Converts numeric values to floats.
    ToFloat,
    /// Computes `ln(1 + max(x, 0))`.
    Log,
    /// Standardizes to zero mean and unit variance.
    Normalize,
    /// Scales to `[0, 1]` using the fitted minimum and maximum.
    NormalizeMinmax,
    /// Encodes tokens as dense integer codes.
    Categorify {
        /// Tokens seen fewer times are treated as unseen.
        #[serde(default)]
        freq_threshold: u64,
        /// Code assignment for unseen and missing values.
        #[serde(default)]
        oov: Oov,
        /// Fixed vocabulary; codes follow list order and no fit is needed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vocabulary: Option<Vec<String>>,
    },
    /// Maps a value to the index of the first boundary greater than it.
    Bucketize {
        /// Strictly increasing boundaries.
        boundaries: Vec<f64>,
    },
    /// Hashes tokens into a fixed number of buckets.
    HashBucket {
        /// Number of buckets.
        num_buckets: u64,
    },
    /// Hashes the tuple of its input columns into one new column.
    HashedCross {
        /// Number of buckets.
        num_buckets: u64,
    },
    /// Replaces values through a lookup table.
    Remap {
        /// Token to code.
        mapping: BTreeMap<String, i64>,
        /// Code for values absent from `mapping`.
        default: i64,
    },
    /// Applies a Rust closure to numeric values.
    #[serde(skip)]
    Lambda(LambdaFn),
}

fn default_sample_size() -> usize {
    DEFAULT_MEDIAN_SAMPLE_SIZE
}

impl Operator {
    /// Creates a lambda operator.
    pub fn lambda(name: impl Into<String>, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::Lambda(LambdaFn::new(name, f))
    }

    /// Creates a categorify operator with default options.
    pub fn categorify() -> Self {
        Self::Categorify {
            freq_threshold: 0,
            oov: Oov::Append,
            vocabulary: None,
        }
    }

    /// Returns the operator name.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Returns true if the operator needs fitted statistics.
    pub fn is_stateful(&self) -> bool {
        match self {
            Self::FillMedian { .. } | Self::Normalize | Self::NormalizeMinmax => true,
            Self::Categorify { vocabulary, .. } => vocabulary.is_none(),
            _ => false,
        }
    }

    /// Returns true if the operator combines several columns into one.
    pub fn is_cross(&self) -> bool {
        matches!(self, Self::HashedCross { .. })
    }

    /// Returns true if the operator can be serialized.
    pub fn is_serializable(&self) -> bool {
        !matches!(self, Self::Lambda(_))
    }

    /// Checks the operator's parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::FillMedian { sample_size: 0 } => Err("sample_size must be at least 1".into()),
            Self::Clip {
                min: Some(min),
                max: Some(max),
            } if min > max => Err(format!("clip bounds are inverted: {min} > {max}")),
            Self::Bucketize { boundaries } => {
                if boundaries.is_empty() {
                    return Err("bucketize needs at least one boundary".into());
                }
                if boundaries.iter().any(|b| !b.is_finite()) {
                    return Err("bucketize boundaries must be finite".into());
                }
                if boundaries.windows(2).any(|w| w[0] >= w[1]) {
                    return Err("bucketize boundaries must be strictly increasing".into());
                }
                Ok(())
            }
            Self::HashBucket { num_buckets } | Self::HashedCross { num_buckets } => {
                check_buckets("num_buckets", *num_buckets)
            }
            Self::Categorify {
                oov, vocabulary, ..
            } => {
                if let Oov::Buckets(buckets) = oov {
                    check_buckets("oov buckets", *buckets)?;
                }
                if let Some(tokens) = vocabulary
                    && let Err(token) = Vocabulary::try_from_tokens(tokens.clone())
                {
                    return Err(format!("duplicate vocabulary token `{token}`"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Returns the type produced from an input of type `input`, or a
    /// description of the accepted types.
    pub fn output_dtype(&self, input: DType) -> Result<DType, &'static str> {
        let numeric = matches!(input, DType::Float | DType::Int);
        let token = matches!(input, DType::Int | DType::Str);
        match self {
            Self::FillMissing { value } => match (input, value) {
                (DType::Float, FillValue::Text(_)) => Err("a string column for a text fill value"),
                (DType::Int, FillValue::Text(_)) => Err("a string column for a text fill value"),
                _ => Ok(input),
            },
            Self::FillMedian { .. }
            | Self::Clip { .. }
            | Self::ToFloat
            | Self::Log
            | Self::Normalize
            | Self::NormalizeMinmax
            | Self::Lambda(_) => numeric.then_some(DType::Float).ok_or("a numeric column"),
            Self::Categorify { .. } | Self::HashBucket { .. } => {
                token.then_some(DType::Int).ok_or("an integer or string column")
            }
            Self::Bucketize { .. } => numeric.then_some(DType::Int).ok_or("a numeric column"),
            Self::HashedCross { .. } | Self::Remap { .. } => Ok(DType::Int),
        }
    }

    /// Returns the role of the output column given the input's role.
    pub fn output_kind(&self, input: ColumnKind) -> ColumnKind {
        let encodes = matches!(
            self,
            Self::Categorify { .. }
                | Self::Bucketize { .. }
                | Self::HashBucket { .. }
                | Self::HashedCross { .. }
        );
        match input {
            ColumnKind::Label => ColumnKind::Label,
            _ if encodes => ColumnKind::Categorical,
            kind => kind,
        }
    }

    /// Number of distinct codes the operator can emit, when bounded.
    pub fn cardinality(&self, stat: Option<&Statistic>) -> Option<u64> {
        match self {
            Self::Bucketize { boundaries } => Some(boundaries.len() as u64 + 1),
            Self::HashBucket { num_buckets } | Self::HashedCross { num_buckets } => {
                Some(*num_buckets)
            }
            Self::Categorify {
                oov, vocabulary, ..
            } => match (vocabulary, stat) {
                (Some(tokens), _) => Some(oov.cardinality(tokens.len())),
                (None, Some(Statistic::Vocabulary { tokens })) => {
                    Some(oov.cardinality(tokens.len()))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns a fresh accumulator for the operator's statistic.
    pub(crate) fn accumulator(&self, seed: u64) -> Option<Accumulator> {
        match self {
            Self::FillMedian { sample_size } => Some(Accumulator::reservoir(*sample_size, seed)),
            Self::Normalize => Some(Accumulator::moments()),
            Self::NormalizeMinmax => Some(Accumulator::min_max()),
            Self::Categorify {
                freq_threshold,
                vocabulary: None,
                ..
            } => Some(Accumulator::vocabulary(*freq_threshold)),
            _ => None,
        }
    }

    /// Returns the statistic a stateless operator carries in its definition.
    pub(crate) fn prepared(&self) -> Option<Statistic> {
        match self {
            Self::Categorify {
                vocabulary: Some(tokens),
                ..
            } => Vocabulary::try_from_tokens(tokens.clone())
                .ok()
                .map(|tokens| Statistic::Vocabulary { tokens }),
            _ => None,
        }
    }
}
