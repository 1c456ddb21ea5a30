//! Column manifest: which columns are categorical, continuous or labels.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::column::Schema;
use crate::error::{Error, Result};

/// Role of a column in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Finite or open vocabulary, integer-encoded.
    Categorical,
    /// Numeric values.
    Continuous,
    /// Training target.
    Label,
}

/// Names of the categorical, continuous and label columns of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnManifest {
    /// Categorical column names.
    #[serde(default)]
    pub categorical: Vec<String>,
    /// Continuous column names.
    #[serde(default)]
    pub continuous: Vec<String>,
    /// Label column names.
    #[serde(default)]
    pub label: Vec<String>,
}

impl ColumnManifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the categorical columns.
    #[must_use]
    pub fn with_categorical<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categorical = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the continuous columns.
    #[must_use]
    pub fn with_continuous<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.continuous = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the label columns.
    #[must_use]
    pub fn with_label<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label = names.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the names of a given kind.
    pub fn names(&self, kind: ColumnKind) -> &[String] {
        match kind {
            ColumnKind::Categorical => &self.categorical,
            ColumnKind::Continuous => &self.continuous,
            ColumnKind::Label => &self.label,
        }
    }

    /// Iterates over every column: continuous, categorical, then labels.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.continuous
            .iter()
            .chain(&self.categorical)
            .chain(&self.label)
            .map(String::as_str)
    }

    /// Returns the kind of a named column.
    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        [
            ColumnKind::Categorical,
            ColumnKind::Continuous,
            ColumnKind::Label,
        ]
        .into_iter()
        .find(|&kind| self.names(kind).iter().any(|n| n == name))
    }

    /// Returns true if the manifest names this column.
    pub fn contains(&self, name: &str) -> bool {
        self.kind_of(name).is_some()
    }

    /// Checks that no column is listed twice and the manifest is non-empty.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in self.all() {
            if !seen.insert(name) {
                return Err(Error::schema()
                    .with_message(format!("column `{name}` listed more than once in manifest")));
            }
        }
        if seen.is_empty() {
            return Err(Error::schema().with_message("manifest names no columns"));
        }
        Ok(())
    }

    /// Checks that every manifest column exists in the dataset schema.
    pub fn check_against(&self, schema: &Schema) -> Result<()> {
        match self.all().find(|name| !schema.contains(name)) {
            Some(missing) => Err(Error::schema()
                .with_message(format!("manifest column `{missing}` not found in dataset"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{DType, Field};

    fn manifest() -> ColumnManifest {
        ColumnManifest::new()
            .with_categorical(["Type", "Breed1"])
            .with_continuous(["Age", "Fee"])
            .with_label(["AdoptionSpeed"])
    }

    #[test]
    fn test_all_order() {
        let manifest = manifest();
        let names: Vec<_> = manifest.all().collect();
        assert_eq!(names, ["Age", "Fee", "Type", "Breed1", "AdoptionSpeed"]);
    }

    #[test]
    fn test_kind_of() {
        let manifest = manifest();
        assert_eq!(manifest.kind_of("Fee"), Some(ColumnKind::Continuous));
        assert_eq!(manifest.kind_of("AdoptionSpeed"), Some(ColumnKind::Label));
        assert_eq!(manifest.kind_of("Color1"), None);
    }

    #[test]
    fn test_validate_duplicates() {
        let manifest = manifest().with_label(["Age"]);
        assert!(manifest.validate().unwrap_err().is_schema());
        assert!(ColumnManifest::new().validate().is_err());
    }

    #[test]
    fn test_check_against_schema() {
        let schema = Schema::new(vec![Field::new("Age", DType::Float)]);
        let manifest = ColumnManifest::new().with_continuous(["Age", "Fee"]);
        let error = manifest.check_against(&schema).unwrap_err();
        assert!(error.to_string().contains("Fee"));
    }
}
