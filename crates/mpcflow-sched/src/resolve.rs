//! External-input resolution.
//!
//! Two traversals share one contract: starting at the roots, decide which
//! relations the graph reads but never produces (external inputs) and record
//! every relation seen in a registry.
//!
//! - [`input_relations_and_paths`] visits every reachable node once and
//!   attaches a storage path to each external input.
//! - [`determine_inputs`] additionally gates descent on readiness: a child is
//!   entered only once everything it reads is produced or external. Loop
//!   bodies are exempt because a body may produce its own inputs across
//!   iterations.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::debug;

use mpcflow_core::error::{Error, Result};
use mpcflow_core::graph::OperatorGraph;
use mpcflow_core::id::NodeId;
use mpcflow_core::relation::RelationRef;

#[derive(Debug, Clone, Default)]
pub struct InputResolution {
    /// External inputs and their storage paths, in discovery order.
    pub inputs: Vec<(RelationRef, String)>,
    /// Every relation name encountered, external or internal.
    pub relations: BTreeMap<String, RelationRef>,
}

impl InputResolution {
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|(r, _)| r.name()).collect()
    }

    pub fn is_input(&self, relation: &str) -> bool {
        self.inputs.iter().any(|(r, _)| r.name() == relation)
    }

    /// Names to seed the scheduler's processed set with.
    pub fn ready_set(&self) -> BTreeSet<String> {
        self.inputs
            .iter()
            .map(|(r, _)| r.name().to_string())
            .collect()
    }
}

/// Breadth-first classification of the relations read under `roots`.
///
/// A relation is external iff no operator reachable from the roots produces
/// it, so the result does not depend on the order in which converging paths
/// are visited.
pub fn input_relations_and_paths(graph: &OperatorGraph, roots: &[NodeId]) -> InputResolution {
    let produced: HashSet<&str> = graph
        .reachable(roots)
        .into_iter()
        .map(|id| graph.node(id).op().output_name())
        .collect();

    let mut out = InputResolution::default();
    let mut known: HashSet<String> = HashSet::new();
    let mut visited: HashSet<NodeId> = roots.iter().copied().collect();
    let mut to_visit: VecDeque<NodeId> = roots.iter().copied().collect();

    while let Some(id) = to_visit.pop_front() {
        let node = graph.node(id);
        let op = node.op();
        for rel in &op.inputs {
            out.relations
                .entry(rel.name().to_string())
                .or_insert_with(|| rel.clone());
            if produced.contains(rel.name()) {
                continue;
            }
            if known.insert(rel.name().to_string()) {
                let path = op.input_path(rel);
                debug!(relation = rel.name(), %path, "external input");
                out.inputs.push((rel.clone(), path));
            }
        }
        known.insert(op.output_name().to_string());
        out.relations
            .entry(op.output_name().to_string())
            .or_insert_with(|| op.output.clone());

        for child in node.loop_children().iter().chain(node.children()) {
            if visited.insert(*child) {
                to_visit.push_back(*child);
            }
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct ReadinessResolution {
    /// External inputs in discovery order.
    pub inputs: Vec<RelationRef>,
    /// Outputs of every node that was entered (or is about to be).
    pub visited: BTreeSet<String>,
    /// Every relation name encountered.
    pub relations: BTreeMap<String, RelationRef>,
    /// Nodes in the order they were processed.
    pub order: Vec<NodeId>,
}

impl ReadinessResolution {
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|r| r.name()).collect()
    }
}

/// Readiness-gated traversal for dependency-sensitive backends.
pub fn determine_inputs(graph: &OperatorGraph, roots: &[NodeId]) -> ReadinessResolution {
    let internal: HashSet<&str> = graph.nodes().map(|n| n.op().output_name()).collect();
    let mut out = ReadinessResolution::default();
    let mut input_names: HashSet<String> = HashSet::new();
    let mut to_visit: VecDeque<NodeId> = VecDeque::new();

    for root in roots {
        let op = graph.node(*root).op();
        out.visited.insert(op.output_name().to_string());
        out.relations
            .insert(op.output_name().to_string(), op.output.clone());
        to_visit.push_back(*root);
    }

    while let Some(id) = to_visit.pop_front() {
        let node = graph.node(id);
        let op = node.op();
        debug!(node = %op, "visited");
        out.order.push(id);

        for rel in &op.inputs {
            let name = rel.name();
            let from_parent = node
                .parents()
                .iter()
                .any(|p| graph.node(*p).op().output_name() == name);
            if !from_parent && !out.visited.contains(name) && !input_names.contains(name) {
                debug!(relation = name, "is an input");
                input_names.insert(name.to_string());
                out.inputs.push(rel.clone());
            } else {
                debug!(relation = name, "is not an input");
            }
            out.relations.insert(name.to_string(), rel.clone());
        }

        for child in node.loop_children().iter().chain(node.children()) {
            let child_op = graph.node(*child).op();
            let ready = child_op.input_names().all(|n| {
                out.visited.contains(n) || input_names.contains(n) || !internal.contains(n)
            });
            if ready || op.is_while() || child_op.is_while() {
                out.relations
                    .insert(child_op.output_name().to_string(), child_op.output.clone());
                if out.visited.insert(child_op.output_name().to_string()) {
                    to_visit.push_back(*child);
                }
            } else {
                debug!(child = %child_op, "not ready yet");
            }
        }
    }
    out
}

/// Reject relations that are read under `roots` but neither produced by any
/// operator nor declared as external input by the front end.
pub fn validate_references(graph: &OperatorGraph, roots: &[NodeId]) -> Result<()> {
    let produced: HashSet<&str> = graph.nodes().map(|n| n.op().output_name()).collect();
    let declared = graph.declared_inputs();
    for id in graph.reachable(roots) {
        let op = graph.node(id).op();
        for name in op.input_names() {
            if !produced.contains(name) && !declared.contains(name) {
                return Err(Error::UnresolvedDependency {
                    relation: name.to_string(),
                    consumer: op.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpcflow_core::operator::{Operator, OperatorKind};
    use mpcflow_core::relation::Relation;
    use mpcflow_core::schema::ColumnType;

    fn rel(name: &str) -> RelationRef {
        Relation::new(name, &[ColumnType::Int, ColumnType::Int]).into_ref()
    }

    fn node(g: &mut OperatorGraph, inputs: &[&str], output: &str) -> NodeId {
        g.add_node(Operator::new(
            OperatorKind::Union,
            inputs.iter().map(|n| rel(n)).collect(),
            rel(output),
        ))
    }

    /// a -> b ; (b, c) -> d where c comes from a second chain x -> c.
    fn converging() -> (OperatorGraph, Vec<NodeId>) {
        let mut g = OperatorGraph::new();
        let b = node(&mut g, &["a"], "b");
        let c = node(&mut g, &["x"], "c");
        let c2 = node(&mut g, &["c"], "c2");
        let d = node(&mut g, &["b", "c2"], "d");
        g.add_edge(b, d);
        g.add_edge(c, c2);
        g.add_edge(c2, d);
        g.infer_roots();
        let roots = g.roots().to_vec();
        (g, roots)
    }

    #[test]
    fn late_producer_is_not_external() {
        let (g, roots) = converging();
        let res = input_relations_and_paths(&g, &roots);
        assert_eq!(res.input_names(), vec!["a", "x"]);
        assert_eq!(res.inputs[0].1, "/tmp/mpcflow/input/a/");
        assert!(res.relations.contains_key("c2"));
        assert!(res.relations.contains_key("d"));
    }

    #[test]
    fn gated_traversal_waits_for_the_last_parent() {
        let (g, roots) = converging();
        let res = determine_inputs(&g, &roots);
        assert_eq!(res.input_names(), vec!["a", "x"]);
        let d = g.producer_of("d").unwrap();
        // d becomes ready only after c2 has been entered.
        let pos_d = res.order.iter().position(|n| *n == d).unwrap();
        let pos_c2 = res
            .order
            .iter()
            .position(|n| *n == g.producer_of("c2").unwrap())
            .unwrap();
        assert!(pos_c2 < pos_d);
        assert_eq!(res.order.len(), 4);
    }

    #[test]
    fn undeclared_relation_is_rejected() {
        let (mut g, roots) = converging();
        g.declare_input("a");
        let err = validate_references(&g, &roots).unwrap_err();
        assert!(matches!(err, Error::UnresolvedDependency { ref relation, .. } if relation == "x"));
        g.declare_input("x");
        assert!(validate_references(&g, &roots).is_ok());
    }
}
