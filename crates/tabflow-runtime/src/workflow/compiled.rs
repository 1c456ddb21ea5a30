//! Compiled workflow graph.

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use tabflow_core::{Column, ColumnManifest, ColumnValues, DType, Field, Partition, Schema};

use super::definition::WorkflowDefinition;
use crate::error::{RuntimeError, RuntimeResult};
use crate::ops::{Operator, OperatorId, apply_column, apply_cross, stable_hash};
use crate::stats::{Accumulator, Statistic, Statistics};

/// One operator applied to its input columns.
#[derive(Debug)]
pub struct Node {
    /// Position of the operator in the definition.
    pub id: OperatorId,
    /// The operator.
    pub op: Operator,
    /// Columns read.
    pub inputs: Vec<String>,
    /// Columns written; pairs with `inputs` unless the operator is a cross.
    pub outputs: Vec<String>,
    /// Number of stateful operators this node transitively depends on.
    pub level: usize,
    pub(crate) prepared: Option<Statistic>,
}

/// A compiled, immutable workflow.
///
/// Produced by [`WorkflowCompiler`](super::WorkflowCompiler) and shared by
/// reference between fit workers, transform workers and inline transforms.
#[derive(Debug)]
pub struct Workflow {
    definition: WorkflowDefinition,
    fingerprint: String,
    graph: DiGraph<Node, ()>,
    order: Vec<NodeIndex>,
    outputs: ColumnManifest,
    fit_passes: usize,
}

impl Workflow {
    pub(crate) fn new(
        definition: WorkflowDefinition,
        fingerprint: String,
        graph: DiGraph<Node, ()>,
        order: Vec<NodeIndex>,
        outputs: ColumnManifest,
    ) -> Self {
        let fit_passes = graph
            .node_weights()
            .filter(|node| node.op.is_stateful())
            .map(|node| node.level + 1)
            .max()
            .unwrap_or(0);

        Self {
            definition,
            fingerprint,
            graph,
            order,
            outputs,
            fit_passes,
        }
    }

    /// Compiles a definition.
    pub fn compile(definition: &WorkflowDefinition) -> RuntimeResult<Self> {
        super::WorkflowCompiler::new(definition).compile()
    }

    /// Returns the definition this workflow was compiled from.
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Returns the input manifest.
    pub fn manifest(&self) -> &ColumnManifest {
        &self.definition.manifest
    }

    /// Returns the output columns and their roles after every operator.
    pub fn final_columns(&self) -> &ColumnManifest {
        &self.outputs
    }

    /// Returns the definition fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Returns true if any operator needs fitted statistics.
    pub fn is_stateful(&self) -> bool {
        self.fit_passes > 0
    }

    /// Number of passes over the data a fit needs.
    pub fn fit_passes(&self) -> usize {
        self.fit_passes
    }

    /// Iterates over the nodes in execution order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(|&index| &self.graph[index])
    }

    /// Checks the input schema and returns the output schema.
    ///
    /// Fails with an unknown column for a manifest column missing from
    /// `schema`, or a type mismatch for an operator that cannot accept its
    /// input. No data is read.
    pub fn output_schema(&self, schema: &Schema) -> RuntimeResult<Schema> {
        let mut dtypes: HashMap<&str, DType> = HashMap::new();
        for name in self.manifest().all() {
            let field = schema
                .field(name)
                .ok_or_else(|| RuntimeError::unknown_column(name, "the dataset schema"))?;
            dtypes.insert(name, field.dtype);
        }

        for node in self.nodes() {
            if node.op.is_cross() {
                dtypes.insert(&node.outputs[0], DType::Int);
                continue;
            }
            for (input, output) in node.inputs.iter().zip(&node.outputs) {
                let dtype = dtypes.get(input.as_str()).copied().ok_or_else(|| {
                    RuntimeError::Internal(format!("column `{input}` has no type"))
                })?;
                let out = node.op.output_dtype(dtype).map_err(|expected| {
                    RuntimeError::ColumnTypeMismatch {
                        operator: node.id,
                        column: input.clone(),
                        dtype,
                        expected: expected.to_owned(),
                    }
                })?;
                dtypes.insert(output, out);
            }
        }

        self.outputs
            .all()
            .map(|name| {
                dtypes
                    .get(name)
                    .map(|&dtype| Field::new(name, dtype))
                    .ok_or_else(|| RuntimeError::Internal(format!("column `{name}` has no type")))
            })
            .collect::<RuntimeResult<Vec<_>>>()
            .map(Schema::new)
    }

    /// Applies every operator to `part`.
    pub fn apply(&self, part: &Partition, stats: Option<&Statistics>) -> RuntimeResult<Partition> {
        let mut columns = self.execute(part, stats, None)?;
        let output = self
            .outputs
            .all()
            .map(|name| {
                columns
                    .remove(name)
                    .map(|values| Column::new(name, values))
                    .ok_or_else(|| RuntimeError::Internal(format!("column `{name}` was not produced")))
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok(Partition::new(output)?)
    }

    /// Creates empty accumulators for the stateful operators fit in pass
    /// `level`.
    pub(crate) fn fit_state(&self, level: usize, seed: u64) -> FitState {
        let mut accumulators = BTreeMap::new();
        for node in self.nodes() {
            if node.level != level {
                continue;
            }
            for column in &node.inputs {
                let seed = seed ^ stable_hash(&format!("{}/{column}", node.id));
                if let Some(acc) = node.op.accumulator(seed) {
                    accumulators.insert((node.id, column.clone()), acc);
                }
            }
        }
        FitState {
            level,
            rows: 0,
            accumulators,
        }
    }

    /// Feeds `part` into the accumulators of `state`, applying the already
    /// fit operators it depends on first.
    pub(crate) fn observe(
        &self,
        part: &Partition,
        stats: Option<&Statistics>,
        state: &mut FitState,
    ) -> RuntimeResult<()> {
        self.execute(part, stats, Some(state))?;
        Ok(())
    }

    fn execute(
        &self,
        part: &Partition,
        stats: Option<&Statistics>,
        mut fit: Option<&mut FitState>,
    ) -> RuntimeResult<HashMap<String, ColumnValues>> {
        let mut columns = HashMap::with_capacity(self.manifest().all().count());
        for name in self.manifest().all() {
            let column = part
                .column(name)
                .ok_or_else(|| RuntimeError::unknown_column(name, "the input partition"))?;
            columns.insert(name.to_owned(), column.values().clone());
        }

        if let Some(state) = fit.as_deref_mut() {
            state.rows += part.num_rows() as u64;
        }

        for node in self.nodes() {
            if let Some(state) = fit.as_deref_mut() {
                if node.level > state.level {
                    continue;
                }
                if node.level == state.level && node.op.is_stateful() {
                    state.observe(node, &columns)?;
                    continue;
                }
            }
            self.apply_node(node, stats, &mut columns)?;
        }
        Ok(columns)
    }

    fn apply_node(
        &self,
        node: &Node,
        stats: Option<&Statistics>,
        columns: &mut HashMap<String, ColumnValues>,
    ) -> RuntimeResult<()> {
        let input = |columns: &HashMap<String, ColumnValues>, name: &str| {
            columns
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::Internal(format!("column `{name}` is not available")))
        };

        if let Operator::HashedCross { num_buckets } = node.op {
            let inputs = node
                .inputs
                .iter()
                .map(|name| input(columns, name))
                .collect::<RuntimeResult<Vec<_>>>()?;
            let refs: Vec<&ColumnValues> = inputs.iter().collect();
            columns.insert(node.outputs[0].clone(), apply_cross(&refs, num_buckets));
            return Ok(());
        }

        for (name, output) in node.inputs.iter().zip(&node.outputs) {
            let values = columns
                .get(name)
                .ok_or_else(|| RuntimeError::Internal(format!("column `{name}` is not available")))?;
            let stat = node
                .prepared
                .as_ref()
                .or_else(|| stats.and_then(|s| s.get(node.id, name)));
            let result = apply_column(node.id, &node.op, name, values, stat)?;
            columns.insert(output.clone(), result);
        }
        Ok(())
    }
}

/// Accumulators of one fit pass.
#[derive(Debug, Clone)]
pub(crate) struct FitState {
    level: usize,
    rows: u64,
    accumulators: BTreeMap<(OperatorId, String), Accumulator>,
}

impl FitState {
    /// Rows observed.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn observe(&mut self, node: &Node, columns: &HashMap<String, ColumnValues>) -> RuntimeResult<()> {
        for name in &node.inputs {
            let values = columns
                .get(name)
                .ok_or_else(|| RuntimeError::Internal(format!("column `{name}` is not available")))?;
            let Some(acc) = self.accumulators.get_mut(&(node.id, name.clone())) else {
                continue;
            };
            acc.observe(values)
                .map_err(|expected| RuntimeError::ColumnTypeMismatch {
                    operator: node.id,
                    column: name.clone(),
                    dtype: values.dtype(),
                    expected: expected.to_owned(),
                })?;
        }
        Ok(())
    }

    /// Merges another worker's state for the same pass.
    pub fn merge(&mut self, other: Self) {
        self.rows += other.rows;
        for (key, acc) in other.accumulators {
            match self.accumulators.get_mut(&key) {
                Some(existing) => existing.merge(acc),
                None => {
                    self.accumulators.insert(key, acc);
                }
            }
        }
    }

    /// Finishes every accumulator into `entries`.
    pub fn finish_into(self, entries: &mut BTreeMap<(OperatorId, String), Statistic>) {
        for (key, acc) in self.accumulators {
            entries.insert(key, acc.finish());
        }
    }
}
