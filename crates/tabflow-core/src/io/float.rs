//! Lossless JSON encoding of `f64` values.
//!
//! JSON numbers cannot carry NaN or infinities. Finite values are written as
//! numbers, NaN as `null`, and infinities as the strings `"inf"` and
//! `"-inf"`. Use with `#[serde(with = "tabflow_core::io::float")]`.

use std::fmt;

use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize, Serializer};

const POS_INF: &str = "inf";
const NEG_INF: &str = "-inf";

/// Serializes one float.
pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let x = *value;
    if x.is_nan() {
        serializer.serialize_none()
    } else if x == f64::INFINITY {
        serializer.serialize_str(POS_INF)
    } else if x == f64::NEG_INFINITY {
        serializer.serialize_str(NEG_INF)
    } else {
        serializer.serialize_f64(x)
    }
}

/// Deserializes one float.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    deserializer.deserialize_any(FloatVisitor)
}

struct FloatVisitor;

impl<'de> Visitor<'de> for FloatVisitor {
    type Value = f64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a number, null, \"inf\" or \"-inf\"")
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<f64, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<f64, E> {
        Ok(value as f64)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<f64, E> {
        Ok(value as f64)
    }

    fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
        Ok(f64::NAN)
    }

    fn visit_none<E: de::Error>(self) -> Result<f64, E> {
        Ok(f64::NAN)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<f64, E> {
        match value {
            POS_INF => Ok(f64::INFINITY),
            NEG_INF => Ok(f64::NEG_INFINITY),
            other => Err(E::invalid_value(Unexpected::Str(other), &self)),
        }
    }
}

/// A float in its stored form, for use inside containers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredFloat(pub f64);

impl Serialize for StoredFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for StoredFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize(deserializer).map(Self)
    }
}

/// The same encoding for `Option<f64>`, where `None` is `null`.
///
/// `Some(NaN)` does not survive and reads back as `None`.
pub mod option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::StoredFloat;

    /// Serializes an optional float.
    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        value.map(StoredFloat).serialize(serializer)
    }

    /// Deserializes an optional float.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        Ok(Option::<StoredFloat>::deserialize(deserializer)?.map(|x| x.0))
    }
}
