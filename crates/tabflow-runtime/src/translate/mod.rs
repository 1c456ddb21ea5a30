//! Translation of declarative feature columns into workflows.
//!
//! A list of [`FeatureColumn`]s collapses into one [`WorkflowDefinition`]
//! that computes every feature as a column, plus a list of
//! [`ReducedFeature`]s describing how a model consumes those columns.
//!
//! # Step Layout
//!
//! 1. **Derived columns**: bucketized features and the encoded inputs of
//!    crossed features, written under new names from raw columns
//! 2. **Crosses**: one `hashed_cross` per crossed feature
//! 3. **In-place encodings**: vocabulary, hash bucket, identity and numeric
//!    fills, which overwrite their raw column last so that earlier steps
//!    still read raw values

mod feature;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tabflow_core::{ColumnKind, ColumnManifest, DType};

pub use self::feature::{CrossKey, FeatureColumn, FeatureValue};
use crate::TRACING_TARGET_TRANSLATE;
use crate::error::{RuntimeError, RuntimeResult};
use crate::ops::{FillValue, Oov, Operator};
use crate::workflow::{ColumnSelector, Step, Workflow, WorkflowDefinition};

/// Prefix of columns computed only as inputs of a cross.
const CROSS_INPUT_PREFIX: &str = "__cross__";

/// How a model consumes a reduced feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum FeatureEncoding {
    /// Values are used as they are.
    Dense,
    /// Codes index an embedding table.
    Embedding {
        /// Embedding width.
        dimension: usize,
    },
    /// Codes are expanded to one-hot vectors.
    Indicator,
}

/// One model input after translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedFeature {
    /// Feature name.
    pub name: String,
    /// Output column holding the feature.
    pub column: String,
    /// Role of the column.
    pub kind: ColumnKind,
    /// Type of the column.
    pub dtype: DType,
    /// Number of distinct codes, for categorical features.
    pub cardinality: Option<u64>,
    /// How the column is fed to the model.
    pub encoding: FeatureEncoding,
}

/// Result of a translation.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// Workflow computing every feature column.
    pub workflow: WorkflowDefinition,
    /// Features in declaration order.
    pub features: Vec<ReducedFeature>,
}

impl Translation {
    /// Returns a feature by name.
    pub fn feature(&self, name: &str) -> Option<&ReducedFeature> {
        self.features.iter().find(|f| f.name == name)
    }
}

/// Translates feature columns into a workflow.
#[derive(Debug, Clone)]
pub struct Translator {
    label: Vec<String>,
}

/// Steps and columns collected while translating.
#[derive(Default)]
struct Plan {
    raw: Vec<(String, ColumnKind)>,
    derived: Vec<Step>,
    crosses: Vec<Step>,
    in_place: Vec<Step>,
    /// Output column to the feature column defining it.
    claimed: HashMap<String, FeatureColumn>,
    private: Vec<String>,
}

impl Translator {
    /// Creates a translator passing `label` columns through unchanged.
    pub fn new<I, S>(label: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into_iter().map(Into::into).collect(),
        }
    }

    /// Translates `features`.
    ///
    /// Fails with an untranslatable-feature error when a column has no
    /// workflow equivalent or two features would produce the same name.
    pub fn translate(&self, features: &[FeatureColumn]) -> RuntimeResult<Translation> {
        let mut plan = Plan::default();
        for label in &self.label {
            plan.declare(label, ColumnKind::Label, label)?;
        }

        let mut names: Vec<String> = self.label.clone();
        let mut reduced = Vec::with_capacity(features.len());
        for feature in features {
            let name = feature.name();
            if names.contains(&name) {
                return Err(feature.untranslatable("the name is already taken"));
            }
            names.push(name.clone());
            reduced.push(plan.feature(feature, name)?);
        }

        let kept: Vec<&str> = reduced.iter().map(|f| f.column.as_str()).collect();
        let mut drop: Vec<String> = plan
            .raw
            .iter()
            .filter(|(name, kind)| *kind != ColumnKind::Label && !kept.contains(&name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();
        drop.extend(plan.private.iter().cloned());

        let names_of = |kind: ColumnKind| {
            plan.raw
                .iter()
                .filter(move |(_, k)| *k == kind)
                .map(|(name, _)| name.clone())
        };
        let manifest = ColumnManifest::new()
            .with_categorical(names_of(ColumnKind::Categorical))
            .with_continuous(names_of(ColumnKind::Continuous))
            .with_label(names_of(ColumnKind::Label));

        let mut workflow = WorkflowDefinition::new(manifest).with_drop(drop);
        workflow.steps = plan
            .derived
            .into_iter()
            .chain(plan.crosses)
            .chain(plan.in_place)
            .collect();

        let compiled = Workflow::compile(&workflow)?;
        tracing::info!(
            target: TRACING_TARGET_TRANSLATE,
            features = reduced.len(),
            steps = workflow.steps.len(),
            dropped = workflow.drop.len(),
            fingerprint = %compiled.fingerprint(),
            "Feature columns translated"
        );

        Ok(Translation {
            workflow,
            features: reduced,
        })
    }
}

impl Plan {
    fn feature(&mut self, feature: &FeatureColumn, name: String) -> RuntimeResult<ReducedFeature> {
        let (column, encoding, inner) = match feature {
            FeatureColumn::Numeric {
                key,
                shape,
                default_value,
            } => {
                if *shape != 1 {
                    return Err(feature.untranslatable(format!("shape {shape} is not a scalar")));
                }
                self.declare(key, ColumnKind::Continuous, &name)?;
                if self.claim(key, feature)? {
                    let mut ops = vec![Operator::ToFloat];
                    if let Some(value) = default_value {
                        ops.push(Operator::FillMissing {
                            value: FillValue::Number(*value),
                        });
                    }
                    self.in_place.push(Step::new(key.as_str(), ops));
                }
                return Ok(ReducedFeature {
                    name,
                    column: key.clone(),
                    kind: ColumnKind::Continuous,
                    dtype: DType::Float,
                    cardinality: None,
                    encoding: FeatureEncoding::Dense,
                });
            }
            FeatureColumn::Embedding {
                categorical,
                dimension,
            } => {
                let column = self.wrapped(feature, categorical)?;
                let encoding = FeatureEncoding::Embedding {
                    dimension: *dimension,
                };
                (column, encoding, categorical.as_ref())
            }
            FeatureColumn::Indicator { categorical } => {
                let column = self.wrapped(feature, categorical)?;
                (column, FeatureEncoding::Indicator, categorical.as_ref())
            }
            categorical => {
                let column = self.categorical(categorical)?;
                (column, FeatureEncoding::Dense, categorical)
            }
        };

        Ok(ReducedFeature {
            name,
            column,
            kind: ColumnKind::Categorical,
            dtype: DType::Int,
            cardinality: cardinality(inner),
            encoding,
        })
    }

    fn wrapped(
        &mut self,
        wrapper: &FeatureColumn,
        categorical: &FeatureColumn,
    ) -> RuntimeResult<String> {
        match categorical {
            FeatureColumn::Numeric { .. } => {
                Err(wrapper.untranslatable("it wraps a numeric column"))
            }
            FeatureColumn::Embedding { .. } | FeatureColumn::Indicator { .. } => {
                Err(wrapper.untranslatable("it wraps another embedding or indicator"))
            }
            categorical => self.categorical(categorical),
        }
    }

    /// Plans a categorical column and returns the column holding it.
    fn categorical(&mut self, feature: &FeatureColumn) -> RuntimeResult<String> {
        let name = feature.name();
        if let FeatureColumn::Crossed {
            keys,
            hash_bucket_size,
        } = feature
        {
            if keys.len() < 2 {
                return Err(feature.untranslatable("a cross needs at least two keys"));
            }
            if !self.claim(&name, feature)? {
                return Ok(name);
            }

            let mut inputs = Vec::with_capacity(keys.len());
            for key in keys {
                inputs.push(match key {
                    CrossKey::Name(raw) => {
                        self.declare(raw, ColumnKind::Categorical, &name)?;
                        raw.clone()
                    }
                    CrossKey::Column(column) => self.cross_input(feature, column)?,
                });
            }
            let op = Operator::HashedCross {
                num_buckets: *hash_bucket_size,
            };
            self.crosses
                .push(Step::new(ColumnSelector::Names(inputs), [op]).with_rename(&name));
            return Ok(name);
        }

        let encoder = Encoder::new(feature)?;
        self.declare(&encoder.key, encoder.raw_kind, &name)?;
        let column = encoder.output(&name);
        if self.claim(&column, feature)? {
            let step = Step::new(encoder.key.as_str(), encoder.ops);
            if encoder.renamed {
                self.derived.push(step.with_rename(&column));
            } else {
                self.in_place.push(step);
            }
        }
        Ok(column)
    }

    /// Plans the private column a cross reads for a feature-column key.
    fn cross_input(&mut self, cross: &FeatureColumn, key: &FeatureColumn) -> RuntimeResult<String> {
        match key {
            FeatureColumn::Numeric { .. } => {
                return Err(cross.untranslatable(format!("key `{}` is continuous", key.name())));
            }
            FeatureColumn::Embedding { .. } | FeatureColumn::Indicator { .. } => {
                return Err(cross.untranslatable(format!(
                    "key `{}` is an embedding or indicator",
                    key.name()
                )));
            }
            FeatureColumn::Crossed { .. } => {
                return Err(cross.untranslatable(format!("key `{}` is itself crossed", key.name())));
            }
            _ => {}
        }

        let encoder = Encoder::new(key)?;
        self.declare(&encoder.key, encoder.raw_kind, &cross.name())?;
        let column = format!("{CROSS_INPUT_PREFIX}{}", key.name());
        if self.claim(&column, key)? {
            self.derived
                .push(Step::new(encoder.key.as_str(), encoder.ops).with_rename(&column));
            self.private.push(column.clone());
        }
        Ok(column)
    }

    /// Records a raw input column and its role.
    fn declare(&mut self, key: &str, kind: ColumnKind, feature: &str) -> RuntimeResult<()> {
        match self.raw.iter().find(|(name, _)| name == key) {
            Some((_, existing)) if *existing != kind => Err(RuntimeError::UntranslatableFeature {
                feature: feature.to_owned(),
                reason: format!("column `{key}` is used as both {existing} and {kind}"),
            }),
            Some(_) => Ok(()),
            None => {
                self.raw.push((key.to_owned(), kind));
                Ok(())
            }
        }
    }

    /// Claims an output column for `feature`. Returns false if an identical
    /// feature already claimed it.
    fn claim(&mut self, column: &str, feature: &FeatureColumn) -> RuntimeResult<bool> {
        match self.claimed.get(column) {
            Some(existing) if existing == feature => Ok(false),
            Some(existing) => Err(feature.untranslatable(format!(
                "column `{column}` is already produced by feature `{}`",
                existing.name()
            ))),
            None => {
                self.claimed.insert(column.to_owned(), feature.clone());
                Ok(true)
            }
        }
    }
}

/// Operator chain encoding one non-crossed categorical feature.
struct Encoder {
    key: String,
    raw_kind: ColumnKind,
    ops: Vec<Operator>,
    renamed: bool,
}

impl Encoder {
    fn new(feature: &FeatureColumn) -> RuntimeResult<Self> {
        let in_place = |key: &String, op: Operator| Self {
            key: key.clone(),
            raw_kind: ColumnKind::Categorical,
            ops: vec![op],
            renamed: false,
        };

        match feature {
            FeatureColumn::Bucketized { source, boundaries } => {
                let FeatureColumn::Numeric {
                    key,
                    shape,
                    default_value,
                } = source.as_ref()
                else {
                    return Err(feature.untranslatable("the source is not a numeric column"));
                };
                if *shape != 1 {
                    return Err(feature.untranslatable(format!("shape {shape} is not a scalar")));
                }

                let mut ops = Vec::with_capacity(2);
                if let Some(value) = default_value {
                    ops.push(Operator::FillMissing {
                        value: FillValue::Number(*value),
                    });
                }
                ops.push(Operator::Bucketize {
                    boundaries: boundaries.clone(),
                });
                Ok(Self {
                    key: key.clone(),
                    raw_kind: ColumnKind::Continuous,
                    ops,
                    renamed: true,
                })
            }
            FeatureColumn::Vocabulary {
                key,
                vocabulary,
                num_oov_buckets,
                default_value,
            } => {
                let oov = match (num_oov_buckets, default_value) {
                    (0 | 1, Some(default)) => Oov::Code(*default),
                    (0, None) => Oov::Code(-1),
                    (1, None) => Oov::Append,
                    (k, None) => Oov::Buckets(*k),
                    (_, Some(_)) => {
                        return Err(feature.untranslatable(
                            "num_oov_buckets > 1 cannot be combined with a default_value",
                        ));
                    }
                };
                let op = Operator::Categorify {
                    freq_threshold: 0,
                    oov,
                    vocabulary: Some(vocabulary.clone()),
                };
                Ok(in_place(key, op))
            }
            FeatureColumn::HashBucket {
                key,
                hash_bucket_size,
            } => Ok(in_place(
                key,
                Operator::HashBucket {
                    num_buckets: *hash_bucket_size,
                },
            )),
            FeatureColumn::Identity {
                key,
                num_buckets,
                default_value,
            } => {
                let op = Operator::Categorify {
                    freq_threshold: 0,
                    oov: Oov::Code(default_value.unwrap_or(-1)),
                    vocabulary: Some((0..*num_buckets).map(|id| id.to_string()).collect()),
                };
                Ok(in_place(key, op))
            }
            other => Err(other.untranslatable("it is not a categorical column")),
        }
    }

    /// Returns the column the encoding writes.
    fn output(&self, name: &str) -> String {
        if self.renamed {
            name.to_owned()
        } else {
            self.key.clone()
        }
    }
}

fn cardinality(feature: &FeatureColumn) -> Option<u64> {
    match feature {
        FeatureColumn::Numeric { .. } => None,
        FeatureColumn::Bucketized { boundaries, .. } => Some(boundaries.len() as u64 + 1),
        FeatureColumn::Vocabulary {
            vocabulary,
            num_oov_buckets,
            ..
        } => Some(vocabulary.len() as u64 + num_oov_buckets),
        FeatureColumn::HashBucket {
            hash_bucket_size, ..
        }
        | FeatureColumn::Crossed {
            hash_bucket_size, ..
        } => Some(*hash_bucket_size),
        FeatureColumn::Identity { num_buckets, .. } => Some(*num_buckets),
        FeatureColumn::Embedding { categorical, .. } | FeatureColumn::Indicator { categorical } => {
            cardinality(categorical)
        }
    }
}
