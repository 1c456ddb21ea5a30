//! Serializable workflow definition.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tabflow_core::{ColumnKind, ColumnManifest};

use crate::error::{RuntimeError, RuntimeResult};
use crate::ops::Operator;

/// Columns a step applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSelector {
    /// Every column currently holding a role, e.g. `{"kind": "continuous"}`.
    Kind {
        /// Role to select.
        kind: ColumnKind,
    },
    /// Explicit column names, e.g. `["Age", "Fee"]`.
    Names(Vec<String>),
}

impl ColumnSelector {
    /// Selects columns by name.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// Selects every column with the given role.
    pub fn kind(kind: ColumnKind) -> Self {
        Self::Kind { kind }
    }
}

impl From<ColumnKind> for ColumnSelector {
    fn from(kind: ColumnKind) -> Self {
        Self::kind(kind)
    }
}

impl From<&str> for ColumnSelector {
    fn from(name: &str) -> Self {
        Self::Names(vec![name.to_owned()])
    }
}

impl<const N: usize> From<[&str; N]> for ColumnSelector {
    fn from(names: [&str; N]) -> Self {
        Self::names(names)
    }
}

/// An operator chain applied to a set of columns.
///
/// Operators run in order. Without `rename` they replace the selected
/// columns in place; with `rename` the chain writes a new column and leaves
/// its input untouched, which requires the chain to produce one column (a
/// single selected column, or a chain starting with `hashed_cross`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Input columns.
    pub columns: ColumnSelector,
    /// Operators, applied in order.
    pub ops: Vec<Operator>,
    /// Name of the column the chain writes, if not in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
}

impl Step {
    /// Creates a step.
    pub fn new(columns: impl Into<ColumnSelector>, ops: impl IntoIterator<Item = Operator>) -> Self {
        Self {
            columns: columns.into(),
            ops: ops.into_iter().collect(),
            rename: None,
        }
    }

    /// Writes the chain's output under a new name.
    #[must_use]
    pub fn with_rename(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    /// Appends an operator to the chain.
    #[must_use]
    pub fn then(mut self, op: Operator) -> Self {
        self.ops.push(op);
        self
    }
}

/// A workflow as written by its author: the input manifest, the steps and
/// the columns to leave out of the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Input columns and their roles.
    pub manifest: ColumnManifest,
    /// Steps, in order.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Columns removed from the output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop: Vec<String>,
}

impl WorkflowDefinition {
    /// Creates a definition without steps.
    pub fn new(manifest: ColumnManifest) -> Self {
        Self {
            manifest,
            steps: Vec::new(),
            drop: Vec::new(),
        }
    }

    /// Adds a step.
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Adds a step in place.
    pub fn add_step(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Removes columns from the output.
    #[must_use]
    pub fn with_drop<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop.extend(names.into_iter().map(Into::into));
        self
    }

    /// Returns true if every operator can be serialized.
    pub fn is_serializable(&self) -> bool {
        self.steps
            .iter()
            .flat_map(|s| &s.ops)
            .all(Operator::is_serializable)
    }

    /// Parses a JSON definition.
    pub fn from_json(json: &str) -> RuntimeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Renders the definition as JSON.
    pub fn to_json(&self) -> RuntimeResult<String> {
        if !self.is_serializable() {
            return Err(RuntimeError::InvalidDefinition(
                "workflows with lambda operators cannot be serialized".into(),
            ));
        }
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a JSON definition from a file.
    pub fn load(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| tabflow_core::Error::io_at(path, e))?;
        Self::from_json(&json)
    }

    /// Writes the definition as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|e| tabflow_core::Error::io_at(path, e))?;
        Ok(())
    }

    /// Hex digest identifying the definition. Statistics record the
    /// fingerprint of the workflow they were fit for.
    pub fn fingerprint(&self) -> RuntimeResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&self.manifest)?);
        for step in &self.steps {
            hasher.update(b"\x1estep");
            hasher.update(serde_json::to_vec(&step.columns)?);
            hasher.update(step.rename.as_deref().unwrap_or_default());
            for op in &step.ops {
                hasher.update(b"\x1f");
                match op {
                    Operator::Lambda(f) => hasher.update(format!("lambda:{}", f.name())),
                    op => hasher.update(serde_json::to_vec(op)?),
                }
            }
        }
        hasher.update(b"\x1edrop");
        hasher.update(serde_json::to_vec(&self.drop)?);

        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect())
    }
}
