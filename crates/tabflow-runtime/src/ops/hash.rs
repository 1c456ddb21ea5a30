//! Stable hashing of categorical tokens.
//!
//! Hashes must not change across processes or releases, since hashed codes
//! are materialized to disk and compared against reference evaluations.

use sha2::{Digest, Sha256};
use tabflow_core::ColumnValues;

/// Separator between the tokens of a crossed feature.
pub const CROSS_SEPARATOR: &str = "_X_";

/// Hashes a token to a 64-bit value.
pub fn stable_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Largest bucket count whose codes all fit in an `i64`.
pub const MAX_BUCKETS: u64 = i64::MAX as u64;

/// Hashes a token into one of `num_buckets` buckets. Counts outside
/// `1..=MAX_BUCKETS` are clamped into that range.
#[inline]
pub fn bucket(token: &str, num_buckets: u64) -> i64 {
    (stable_hash(token) % num_buckets.clamp(1, MAX_BUCKETS)) as i64
}

/// Renders a float as a categorical token. Integral values print without a
/// fractional part, so `2.0` and `2` produce the same token.
pub fn float_token(value: f64) -> String {
    value.to_string()
}

/// Returns the token of row `index`, or `None` for a missing value.
pub fn token_at(values: &ColumnValues, index: usize) -> Option<String> {
    match values {
        ColumnValues::Float(v) => {
            let x = v[index];
            (!x.is_nan()).then(|| float_token(x))
        }
        ColumnValues::Int(v) => Some(v[index].to_string()),
        ColumnValues::Str(v) => v[index].clone(),
    }
}

/// Joins the tokens of one row of a cross. Missing tokens become empty.
pub fn cross_token<'a>(tokens: impl IntoIterator<Item = Option<&'a str>>) -> String {
    tokens
        .into_iter()
        .map(|t| t.unwrap_or_default())
        .collect::<Vec<_>>()
        .join(CROSS_SEPARATOR)
}
