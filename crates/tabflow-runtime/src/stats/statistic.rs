//! Fitted per-column aggregates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// An aggregate computed for one column by a stateful operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[derive(IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statistic {
    /// Count, mean and sample standard deviation.
    Moments {
        /// Number of non-missing values.
        count: u64,
        /// Mean.
        #[serde(with = "tabflow_core::io::float")]
        mean: f64,
        /// Sample standard deviation (0 with fewer than two values).
        #[serde(with = "tabflow_core::io::float")]
        std: f64,
    },
    /// Observed range.
    MinMax {
        /// Minimum.
        #[serde(with = "tabflow_core::io::float")]
        min: f64,
        /// Maximum.
        #[serde(with = "tabflow_core::io::float")]
        max: f64,
    },
    /// Categorical vocabulary.
    Vocabulary {
        /// Known tokens in code order.
        tokens: Vocabulary,
    },
    /// Estimated median; `None` when the column had no values.
    Median {
        /// Median.
        #[serde(with = "tabflow_core::io::float::option")]
        value: Option<f64>,
    },
}

impl Statistic {
    /// Returns the statistic kind.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

/// An ordered list of distinct tokens; a token's code is its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, i64>,
}

impl Vocabulary {
    /// Builds a vocabulary, failing with the first duplicated token.
    pub fn try_from_tokens(tokens: Vec<String>) -> Result<Self, String> {
        let mut index = HashMap::with_capacity(tokens.len());
        for (code, token) in tokens.iter().enumerate() {
            if index.insert(token.clone(), code as i64).is_some() {
                return Err(token.clone());
            }
        }
        Ok(Self { tokens, index })
    }

    /// Returns the code of a known token.
    #[inline]
    pub fn code(&self, token: &str) -> Option<i64> {
        self.index.get(token).copied()
    }

    /// Returns the token with the given code.
    pub fn token(&self, code: usize) -> Option<&str> {
        self.tokens.get(code).map(String::as_str)
    }

    /// Returns the tokens in code order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Returns the number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if no token is known.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = String;

    fn try_from(tokens: Vec<String>) -> Result<Self, Self::Error> {
        Self::try_from_tokens(tokens).map_err(|token| format!("duplicate token `{token}`"))
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.tokens
    }
}
