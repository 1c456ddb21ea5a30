//! Workflow compiler for turning definitions into executable graphs.
//!
//! # Compilation Process
//!
//! 1. **Validation**: check the manifest, every operator's parameters and
//!    every column reference
//! 2. **Graph Building**: one node per operator, with an edge wherever a node
//!    reads or overwrites a column an earlier node touched
//! 3. **Levelling**: walk the graph in topological order and assign each
//!    node the number of stateful operators it transitively depends on, which
//!    decides the fit pass it is fit in

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tabflow_core::{ColumnKind, ColumnManifest};

use super::compiled::{Node, Workflow};
use super::definition::{ColumnSelector, Step, WorkflowDefinition};
use crate::error::{RuntimeError, RuntimeResult};
use crate::ops::{CROSS_SEPARATOR, OperatorId};

/// Compiles one [`WorkflowDefinition`] into a [`Workflow`].
pub struct WorkflowCompiler<'a> {
    definition: &'a WorkflowDefinition,
    graph: DiGraph<Node, ()>,
    /// Columns in creation order, with their current role.
    columns: Vec<(String, ColumnKind)>,
    last_writer: HashMap<String, NodeIndex>,
    readers: HashMap<String, Vec<NodeIndex>>,
}

impl<'a> WorkflowCompiler<'a> {
    /// Creates a compiler for `definition`.
    pub fn new(definition: &'a WorkflowDefinition) -> Self {
        let manifest = &definition.manifest;
        let columns = manifest
            .all()
            .filter_map(|name| Some((name.to_owned(), manifest.kind_of(name)?)))
            .collect();

        Self {
            definition,
            graph: DiGraph::new(),
            columns,
            last_writer: HashMap::new(),
            readers: HashMap::new(),
        }
    }

    /// Compiles the definition.
    pub fn compile(mut self) -> RuntimeResult<Workflow> {
        // Phase 1: Validate the manifest
        self.definition
            .manifest
            .validate()
            .map_err(|e| RuntimeError::InvalidDefinition(e.to_string()))?;

        // Phase 2: Build one node per operator
        for (index, step) in self.definition.steps.iter().enumerate() {
            self.add_step(index, step)?;
        }
        let outputs = self.outputs()?;

        // Phase 3: Order nodes and assign fit levels
        let order = petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            RuntimeError::InvalidDefinition(format!(
                "operator {} depends on itself",
                self.graph[cycle.node_id()].id
            ))
        })?;
        for &index in &order {
            let level = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .map(|pred| {
                    let pred = &self.graph[pred];
                    pred.level + usize::from(pred.op.is_stateful())
                })
                .max()
                .unwrap_or(0);
            self.graph[index].level = level;
        }

        Ok(Workflow::new(
            self.definition.clone(),
            self.definition.fingerprint()?,
            self.graph,
            order,
            outputs,
        ))
    }

    fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, kind)| *kind)
    }

    fn set_kind(&mut self, name: &str, kind: ColumnKind) {
        match self.columns.iter_mut().find(|(column, _)| column == name) {
            Some(slot) => slot.1 = kind,
            None => self.columns.push((name.to_owned(), kind)),
        }
    }

    fn resolve(&self, index: usize, selector: &ColumnSelector) -> RuntimeResult<Vec<String>> {
        let names: Vec<String> = match selector {
            ColumnSelector::Kind { kind } => self
                .columns
                .iter()
                .filter(|(_, k)| k == kind)
                .map(|(name, _)| name.clone())
                .collect(),
            ColumnSelector::Names(names) => {
                for (i, name) in names.iter().enumerate() {
                    if self.kind_of(name).is_none() {
                        return Err(RuntimeError::unknown_column(name, format!("step {index}")));
                    }
                    if names[..i].contains(name) {
                        return Err(RuntimeError::InvalidDefinition(format!(
                            "step {index} selects `{name}` twice"
                        )));
                    }
                }
                names.clone()
            }
        };

        if names.is_empty() {
            return Err(RuntimeError::InvalidDefinition(format!(
                "step {index} selects no columns"
            )));
        }
        Ok(names)
    }

    fn add_step(&mut self, index: usize, step: &Step) -> RuntimeResult<()> {
        if step.ops.is_empty() {
            return Err(RuntimeError::InvalidDefinition(format!(
                "step {index} has no operators"
            )));
        }

        let mut current = self.resolve(index, &step.columns)?;
        let starts_with_cross = step.ops[0].is_cross();
        if step.rename.is_some() && current.len() > 1 && !starts_with_cross {
            return Err(RuntimeError::InvalidDefinition(format!(
                "step {index} renames its output but selects {} columns",
                current.len()
            )));
        }

        for (position, op) in step.ops.iter().enumerate() {
            let id = OperatorId::new(index, position);
            op.validate()
                .map_err(|m| RuntimeError::InvalidDefinition(format!("operator {id}: {m}")))?;

            let outputs = if op.is_cross() {
                if current.len() < 2 {
                    return Err(RuntimeError::InvalidDefinition(format!(
                        "operator {id} crosses {} column(s), expected at least 2",
                        current.len()
                    )));
                }
                let name = match &step.rename {
                    Some(name) => name.clone(),
                    None => current.join(CROSS_SEPARATOR),
                };
                self.check_new_column(id, &name, &current)?;
                vec![name]
            } else {
                match (&step.rename, position) {
                    (Some(name), 0) => {
                        self.check_new_column(id, name, &current)?;
                        vec![name.clone()]
                    }
                    _ => current.clone(),
                }
            };

            let kinds: Vec<ColumnKind> = if op.is_cross() {
                vec![ColumnKind::Categorical]
            } else {
                current
                    .iter()
                    .map(|name| {
                        let kind = self.kind_of(name).unwrap_or(ColumnKind::Continuous);
                        op.output_kind(kind)
                    })
                    .collect()
            };

            let node = self.graph.add_node(Node {
                id,
                op: op.clone(),
                inputs: current.clone(),
                outputs: outputs.clone(),
                level: 0,
                prepared: op.prepared(),
            });
            self.link(node, &current, &outputs);

            for (name, kind) in outputs.iter().zip(kinds) {
                self.set_kind(name, kind);
            }
            current = outputs;
        }
        Ok(())
    }

    /// A renamed or crossed output must not overwrite an unrelated column.
    fn check_new_column(&self, id: OperatorId, name: &str, inputs: &[String]) -> RuntimeResult<()> {
        if self.kind_of(name).is_some() && !(inputs.len() == 1 && inputs[0] == name) {
            return Err(RuntimeError::InvalidDefinition(format!(
                "operator {id} would overwrite existing column `{name}`"
            )));
        }
        Ok(())
    }

    fn link(&mut self, node: NodeIndex, inputs: &[String], outputs: &[String]) {
        for input in inputs {
            if let Some(&writer) = self.last_writer.get(input) {
                self.graph.update_edge(writer, node, ());
            }
            self.readers.entry(input.clone()).or_default().push(node);
        }
        for output in outputs {
            for &reader in self.readers.get(output).into_iter().flatten() {
                if reader != node {
                    self.graph.update_edge(reader, node, ());
                }
            }
            if let Some(&writer) = self.last_writer.get(output)
                && writer != node
            {
                self.graph.update_edge(writer, node, ());
            }
            self.last_writer.insert(output.clone(), node);
            self.readers.remove(output);
        }
    }

    fn outputs(&self) -> RuntimeResult<ColumnManifest> {
        for name in &self.definition.drop {
            if self.kind_of(name).is_none() {
                return Err(RuntimeError::unknown_column(name, "the drop list"));
            }
        }

        let kept = |kind: ColumnKind| -> Vec<String> {
            self.columns
                .iter()
                .filter(|(name, k)| *k == kind && !self.definition.drop.contains(name))
                .map(|(name, _)| name.clone())
                .collect()
        };
        let outputs = ColumnManifest::new()
            .with_continuous(kept(ColumnKind::Continuous))
            .with_categorical(kept(ColumnKind::Categorical))
            .with_label(kept(ColumnKind::Label));

        if outputs.all().next().is_none() {
            return Err(RuntimeError::InvalidDefinition(
                "workflow produces no columns".into(),
            ));
        }
        Ok(outputs)
    }
}
