//! Dependency-respecting operator scheduling.
//!
//! `translate_dag` walks ordinary edges depth-first from a frontier and emits
//! an operator only once every relation it reads is in the `processed` set.
//! A node reachable along several paths (a diamond) is emitted once: its
//! output name enters `processed` on first emission and later visits are
//! refused by [`can_schedule`].
//!
//! A node visited before its inputs are ready is skipped at that frontier.
//! If no later path revisits it, it is never emitted. `ScheduleMode::Strict`
//! turns such stranded nodes into an error after the walk.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mpcflow_core::error::{Error, Result};
use mpcflow_core::graph::{OperatorGraph, OperatorNode};
use mpcflow_core::id::NodeId;
use mpcflow_core::operator::Operator;

/// One operator's generated fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCode {
    pub node: NodeId,
    pub code: String,
}

impl JobCode {
    pub fn new(node: NodeId, code: impl Into<String>) -> Self {
        Self {
            node,
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Skip operators whose inputs never become ready, without a diagnostic.
    #[default]
    Permissive,
    /// Report stranded operators as `Error::Unschedulable`.
    Strict,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleState {
    /// Relation names that are available to downstream operators.
    pub processed: BTreeSet<String>,
    /// Fragments in emission order.
    pub fragments: Vec<JobCode>,
    /// Emitted nodes without consumers, in first-seen order.
    pub leaves: Vec<NodeId>,
}

impl ScheduleState {
    pub fn seeded(processed: BTreeSet<String>) -> Self {
        Self {
            processed,
            ..Self::default()
        }
    }

    /// Nodes in the order they were emitted.
    pub fn order(&self) -> Vec<NodeId> {
        self.fragments.iter().map(|j| j.node).collect()
    }

    /// Concatenated fragments, no reordering.
    pub fn code(&self) -> String {
        self.fragments.iter().map(|j| j.code.as_str()).collect()
    }
}

/// Whether `op` may be emitted given the relations already available.
pub fn can_schedule(op: &Operator, processed: &BTreeSet<String>) -> bool {
    if processed.contains(op.output_name()) {
        debug!(output = op.output_name(), "operator already scheduled");
        return false;
    }
    for input in op.input_names() {
        if !processed.contains(input) {
            debug!(output = op.output_name(), missing = input, "cannot schedule yet");
            return false;
        }
    }
    true
}

/// Emit every schedulable node under `frontier`, recursing into ordinary
/// children of each emitted node. Loop children are not descended into.
pub fn translate_dag<F>(
    graph: &OperatorGraph,
    frontier: &[NodeId],
    state: &mut ScheduleState,
    translate: &mut F,
) -> Result<()>
where
    F: FnMut(&OperatorNode) -> Result<JobCode>,
{
    for id in frontier {
        let node = graph.node(*id);
        let op = node.op();
        debug!(output = op.output_name(), "translating");
        if !can_schedule(op, &state.processed) {
            debug!(output = op.output_name(), "cannot schedule operator yet");
            continue;
        }
        let job = translate(node)?;
        state.fragments.push(job);
        state.processed.insert(op.output_name().to_string());
        if node.children().is_empty() {
            if node.is_leaf() && !state.leaves.contains(id) {
                state.leaves.push(*id);
            }
        } else {
            translate_dag(graph, node.children(), state, translate)?;
        }
    }
    Ok(())
}

/// Drives [`translate_dag`] from a graph's roots and applies the mode.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler<'g> {
    graph: &'g OperatorGraph,
    mode: ScheduleMode,
}

impl<'g> Scheduler<'g> {
    pub fn new(graph: &'g OperatorGraph, mode: ScheduleMode) -> Self {
        Self { graph, mode }
    }

    pub fn run<F>(&self, ready: BTreeSet<String>, translate: &mut F) -> Result<ScheduleState>
    where
        F: FnMut(&OperatorNode) -> Result<JobCode>,
    {
        let mut state = ScheduleState::seeded(ready);
        translate_dag(self.graph, self.graph.roots(), &mut state, translate)?;
        info!(
            emitted = state.fragments.len(),
            leaves = state.leaves.len(),
            "schedule complete"
        );

        let stranded = stranded(self.graph, self.graph.roots(), &state.processed);
        if !stranded.is_empty() {
            match self.mode {
                ScheduleMode::Strict => return Err(Error::Unschedulable { outputs: stranded }),
                ScheduleMode::Permissive => {
                    debug!(?stranded, "operators dropped from the schedule")
                }
            }
        }
        Ok(state)
    }
}

/// Outputs of nodes reachable over ordinary edges that never entered `processed`.
pub fn stranded(
    graph: &OperatorGraph,
    roots: &[NodeId],
    processed: &BTreeSet<String>,
) -> Vec<String> {
    let mut seen: HashSet<NodeId> = roots.iter().copied().collect();
    let mut queue: VecDeque<NodeId> = roots.iter().copied().collect();
    let mut out = Vec::new();
    while let Some(id) = queue.pop_front() {
        let node = graph.node(id);
        if !processed.contains(node.op().output_name()) {
            out.push(node.op().output_name().to_string());
        }
        for child in node.children() {
            if seen.insert(*child) {
                queue.push_back(*child);
            }
        }
    }
    out
}
