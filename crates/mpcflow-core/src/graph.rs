//! Arena-backed operator graph.
//!
//! Nodes are addressed by `NodeId`. Each node keeps two separate adjacency
//! lists: ordinary dataflow `children` and `loop_children`, the bodies of
//! iterative constructs. Only ordinary edges must be acyclic.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::operator::Operator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorNode {
    id: NodeId,
    op: Operator,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    loop_children: Vec<NodeId>,
}

impl OperatorNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Operator {
        &self.op
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn loop_children(&self) -> &[NodeId] {
        &self.loop_children
    }

    /// A node without consumers of either kind; its output gets exported.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && self.loop_children.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorGraph {
    nodes: Vec<OperatorNode>,
    roots: Vec<NodeId>,
    /// Relations the front end declared as externally supplied.
    declared_inputs: BTreeSet<String>,
}

impl OperatorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, op: Operator) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(OperatorNode {
            id,
            op,
            parents: Vec::new(),
            children: Vec::new(),
            loop_children: Vec::new(),
        });
        id
    }

    /// Ordinary producer -> consumer edge. Duplicate edges are ignored.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        if !self.nodes[parent.index()].children.contains(&child) {
            self.nodes[parent.index()].children.push(child);
        }
        self.link_parent(parent, child);
    }

    /// Edge from an iterative construct into its body.
    pub fn add_loop_edge(&mut self, parent: NodeId, child: NodeId) {
        if !self.nodes[parent.index()].loop_children.contains(&child) {
            self.nodes[parent.index()].loop_children.push(child);
        }
        self.link_parent(parent, child);
    }

    fn link_parent(&mut self, parent: NodeId, child: NodeId) {
        let parents = &mut self.nodes[child.index()].parents;
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }

    pub fn set_roots(&mut self, roots: Vec<NodeId>) {
        self.roots = roots;
    }

    /// Use every parentless node as a root, in insertion order.
    pub fn infer_roots(&mut self) {
        self.roots = self
            .nodes
            .iter()
            .filter(|n| n.parents.is_empty())
            .map(|n| n.id)
            .collect();
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn declare_input(&mut self, relation: impl Into<String>) {
        self.declared_inputs.insert(relation.into());
    }

    pub fn declared_inputs(&self) -> &BTreeSet<String> {
        &self.declared_inputs
    }

    /// Panics if `id` was not issued by this graph.
    pub fn node(&self, id: NodeId) -> &OperatorNode {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&OperatorNode> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &OperatorNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node (in insertion order) producing `relation`.
    pub fn producer_of(&self, relation: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.op.output_name() == relation)
            .map(|n| n.id)
    }

    /// Output names claimed by more than one node.
    pub fn duplicate_outputs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dups = Vec::new();
        for n in &self.nodes {
            let name = n.op.output_name();
            if !seen.insert(name) && !dups.iter().any(|d| d == name) {
                dups.push(name.to_string());
            }
        }
        dups
    }

    /// Nodes reachable from `roots` over both edge kinds, breadth-first.
    pub fn reachable(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut seen: HashSet<NodeId> = roots.iter().copied().collect();
        let mut queue: VecDeque<NodeId> = roots.iter().copied().collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let node = self.node(id);
            for next in node.loop_children.iter().chain(node.children.iter()) {
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        order
    }

    /// Fail if the ordinary edges contain a cycle. Loop edges are exempt.
    pub fn validate_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Fresh,
            Active,
            Done,
        }

        let mut marks = vec![Mark::Fresh; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Fresh {
                continue;
            }
            // Iterative DFS: (node, next child position).
            let mut stack = vec![(start, 0usize)];
            marks[start] = Mark::Active;
            while let Some((idx, pos)) = stack.pop() {
                let children = &self.nodes[idx].children;
                if pos < children.len() {
                    stack.push((idx, pos + 1));
                    let child = children[pos].index();
                    match marks[child] {
                        Mark::Active => {
                            return Err(Error::Cycle(
                                self.nodes[child].op.output_name().to_string(),
                            ))
                        }
                        Mark::Fresh => {
                            marks[child] = Mark::Active;
                            stack.push((child, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[idx] = Mark::Done;
                }
            }
        }
        Ok(())
    }

    /// Structural checks: unique outputs and acyclic ordinary edges.
    pub fn validate(&self) -> Result<()> {
        if let Some(dup) = self.duplicate_outputs().into_iter().next() {
            return Err(Error::DuplicateOutput(dup));
        }
        self.validate_acyclic()
    }

    /// Output relation name -> producing node, for the whole arena.
    pub fn producers(&self) -> HashMap<&str, NodeId> {
        let mut map = HashMap::new();
        for n in &self.nodes {
            map.entry(n.op.output_name()).or_insert(n.id);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OperatorKind;
    use crate::relation::{Relation, RelationRef};
    use crate::schema::ColumnType;

    fn rel(name: &str) -> RelationRef {
        Relation::new(name, &[ColumnType::Int]).into_ref()
    }

    fn union(graph: &mut OperatorGraph, input: &str, output: &str) -> NodeId {
        graph.add_node(Operator::new(OperatorKind::Union, vec![rel(input)], rel(output)))
    }

    #[test]
    fn loop_edges_do_not_count_as_cycles() {
        let mut g = OperatorGraph::new();
        let w = union(&mut g, "a", "b");
        let body = union(&mut g, "b", "c");
        g.add_loop_edge(w, body);
        g.add_loop_edge(body, w);
        assert!(g.validate_acyclic().is_ok());

        g.add_edge(body, w);
        g.add_edge(w, body);
        assert!(matches!(g.validate_acyclic(), Err(Error::Cycle(_))));
    }

    #[test]
    fn leaves_and_roots() {
        let mut g = OperatorGraph::new();
        let a = union(&mut g, "in", "a");
        let b = union(&mut g, "a", "b");
        g.add_edge(a, b);
        g.add_edge(a, b);
        g.infer_roots();
        assert_eq!(g.roots(), &[a]);
        assert_eq!(g.node(a).children(), &[b]);
        assert!(g.node(b).is_leaf());
        assert!(!g.node(a).is_leaf());
        assert_eq!(g.reachable(&[a]), vec![a, b]);
    }

    #[test]
    fn duplicate_outputs_are_reported_once() {
        let mut g = OperatorGraph::new();
        union(&mut g, "x", "a");
        union(&mut g, "y", "a");
        union(&mut g, "z", "a");
        assert_eq!(g.duplicate_outputs(), vec!["a".to_string()]);
        assert!(matches!(g.validate(), Err(Error::DuplicateOutput(_))));
    }
}
