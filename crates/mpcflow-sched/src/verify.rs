//! Debug-time verification helpers for schedules.
//!
//! Intended for tests and debug builds to catch ordering violations early.
//! They should be cheap.

use std::collections::BTreeSet;

use mpcflow_core::graph::OperatorGraph;

use crate::schedule::ScheduleState;

/// Verify every emitted operator read only relations that were ready
/// (`ready` at start, or produced by an earlier emitted operator).
pub fn assert_scheduled_in_order(
    graph: &OperatorGraph,
    ready: &BTreeSet<String>,
    state: &ScheduleState,
) {
    let mut seen = ready.clone();
    for id in state.order() {
        let op = graph.node(id).op();
        for input in op.input_names() {
            assert!(
                seen.contains(input),
                "relation {input} not ready before {op}"
            );
        }
        assert!(
            seen.insert(op.output_name().to_string()),
            "{op} emitted twice or overwrites an input"
        );
    }
}

/// Verify every recorded leaf was emitted and has no consumers.
pub fn assert_leaves_exported(graph: &OperatorGraph, state: &ScheduleState) {
    let order = state.order();
    for leaf in &state.leaves {
        assert!(order.contains(leaf), "leaf {leaf} was never emitted");
        assert!(graph.node(*leaf).is_leaf(), "{leaf} has consumers");
    }
}
