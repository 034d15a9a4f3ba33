//! A pending aggregation and the schema it is tracked against.
//!
//! Downstream operators are written against the post-aggregation relation
//! (`deferred`). While the obligation is open that relation is never
//! materialized; instead every operator it passes is rewritten to run on the
//! pre-aggregation rows (`relation`), and the aggregation is emitted once at
//! the boundary where it must be resolved.

use std::fmt;

use tracing::debug;

use mpcflow_core::error::{Error, Result};
use mpcflow_core::graph::OperatorNode;
use mpcflow_core::id::NodeId;
use mpcflow_core::operator::{AggFunc, IoPaths, Operator, OperatorKind};
use mpcflow_core::relation::{Relation, RelationRef, Value};
use mpcflow_core::schema::{Column, ColumnType};

use crate::rules::{CommutationRules, GroupPreserving};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupByType {
    /// One group over all rows.
    Global,
    /// Grouped by these columns of the pre-aggregation relation.
    Keyed(Vec<Column>),
}

impl GroupByType {
    pub fn keys(&self) -> &[Column] {
        match self {
            GroupByType::Global => &[],
            GroupByType::Keyed(keys) => keys,
        }
    }
}

/// An operator rewritten to run before the pending aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredOperator {
    pub node: NodeId,
    pub operator: Operator,
}

#[derive(Debug, Clone)]
pub struct Obligation {
    origin: NodeId,
    func: AggFunc,
    group_by: GroupByType,
    agg_column: Column,
    relation: RelationRef,
    deferred: RelationRef,
    paths: IoPaths,
}

impl Obligation {
    /// Open an obligation for an aggregate node.
    pub fn new(node: &OperatorNode) -> Result<Self> {
        let op = node.op();
        let OperatorKind::Aggregate {
            func,
            group_by,
            columns,
        } = &op.kind
        else {
            return Err(Error::Invariant(format!(
                "obligation opened on non-aggregate {op}"
            )));
        };
        let [input] = op.inputs.as_slice() else {
            return Err(Error::Schema(format!("{op} must read exactly one relation")));
        };
        let [agg_column] = columns.as_slice() else {
            return Err(Error::Schema(format!(
                "{op} must aggregate exactly one column"
            )));
        };
        if let Some(c) = group_by
            .iter()
            .chain(Some(agg_column))
            .find(|c| c.relation() != input.name() || c.index() >= input.arity())
        {
            return Err(Error::Schema(format!("{op} references foreign column {c}")));
        }
        if op.output.arity() != group_by.len() + 1 {
            return Err(Error::Schema(format!(
                "{op} output must hold {} group-by columns and the aggregate",
                group_by.len()
            )));
        }

        let group_by = if group_by.is_empty() {
            GroupByType::Global
        } else {
            GroupByType::Keyed(group_by.clone())
        };
        Ok(Self {
            origin: node.id(),
            func: *func,
            group_by,
            agg_column: agg_column.clone(),
            relation: input.clone(),
            deferred: op.output.clone(),
            paths: op.paths.clone(),
        })
    }

    pub fn origin(&self) -> NodeId {
        self.origin
    }

    pub fn func(&self) -> AggFunc {
        self.func
    }

    pub fn group_by(&self) -> &GroupByType {
        &self.group_by
    }

    pub fn agg_column(&self) -> &Column {
        &self.agg_column
    }

    /// Pre-aggregation relation the aggregation will eventually read.
    pub fn relation(&self) -> &RelationRef {
        &self.relation
    }

    /// Name downstream operators read the aggregated rows under.
    pub fn deferred_name(&self) -> &str {
        self.deferred.name()
    }

    /// Columns in the aggregated layout: keys then the aggregate.
    pub fn deferred_arity(&self) -> usize {
        self.group_by.keys().len() + 1
    }

    pub fn is_key(&self, column: &Column) -> bool {
        self.group_by.keys().contains(column)
    }

    /// Map a column of the aggregated relation to the pre-aggregation column
    /// it is computed from. `None` for columns of any other relation.
    pub fn lift(&self, column: &Column) -> Option<Column> {
        if column.relation() != self.deferred.name() {
            return None;
        }
        let keys = self.group_by.keys();
        match column.index().cmp(&keys.len()) {
            std::cmp::Ordering::Less => Some(keys[column.index()].clone()),
            std::cmp::Ordering::Equal => Some(self.agg_column.clone()),
            std::cmp::Ordering::Greater => None,
        }
    }

    /// Whether the aggregation may stay pending past `op`.
    pub fn can_pass_operator(&self, op: &Operator) -> bool {
        self.can_pass_with(&GroupPreserving, op)
    }

    pub fn can_pass_with<R: CommutationRules + ?Sized>(&self, rules: &R, op: &Operator) -> bool {
        if !op.reads(self.deferred.name()) {
            return false;
        }
        let single = op.inputs.len() == 1;
        match &op.kind {
            OperatorKind::Select { columns, condition } => {
                single && rules.select(self, columns, condition.as_ref())
            }
            OperatorKind::Project { columns } => single && rules.project(self, columns),
            OperatorKind::Math { op, left, right } => single && rules.math(self, *op, left, right),
            OperatorKind::Join {
                left_key,
                right_key,
            } => rules.join(self, left_key, right_key),
            OperatorKind::Aggregate { .. } => rules.aggregate(self),
            OperatorKind::Union => rules.union(self),
            OperatorKind::While { .. } => rules.while_loop(self),
        }
    }

    /// Carry the obligation across `node` under the default rules.
    pub fn pass_through(&mut self, node: &OperatorNode) -> Result<DeferredOperator> {
        self.pass_through_with(&GroupPreserving, node)
    }

    /// Carry the obligation across `node`, returning the operator rewritten
    /// against the pre-aggregation rows. The obligation is left untouched on
    /// error.
    pub fn pass_through_with<R: CommutationRules + ?Sized>(
        &mut self,
        rules: &R,
        node: &OperatorNode,
    ) -> Result<DeferredOperator> {
        let op = node.op();
        if !self.can_pass_with(rules, op) {
            return Err(Error::IllegalPassThrough {
                relation: self.deferred.name().to_string(),
                operator: op.to_string(),
            });
        }

        let pre_name = format!("{}_pre", op.output_name());
        let lift = |c: &Column| {
            self.lift(c).ok_or_else(|| {
                Error::Schema(format!("{op} reads {c} outside the aggregated layout"))
            })
        };
        let lift_value = |v: &Value| -> Result<Value> {
            match v {
                Value::Column(c) => lift(c).map(Value::Column),
                Value::Constant(_) => Ok(v.clone()),
            }
        };

        let (kind, narrowed) = match &op.kind {
            OperatorKind::Select { columns, condition } => {
                let condition = match condition {
                    Some(cond) => Some(cond.try_map_columns(&mut |c| self.lift(c)).ok_or_else(
                        || Error::Schema(format!("{op} filters outside the aggregated layout")),
                    )?),
                    None => None,
                };
                let narrowed = !columns.is_empty();
                let columns = if narrowed { self.tracked() } else { Vec::new() };
                (OperatorKind::Select { columns, condition }, narrowed)
            }
            OperatorKind::Project { .. } => (
                OperatorKind::Project {
                    columns: self.tracked(),
                },
                true,
            ),
            OperatorKind::Math {
                op: math,
                left,
                right,
            } => (
                OperatorKind::Math {
                    op: *math,
                    left: lift_value(left)?,
                    right: lift_value(right)?,
                },
                false,
            ),
            other => {
                return Err(Error::UnsupportedOperator {
                    backend: "mpc",
                    operator: op.to_string(),
                    reason: format!("no pre-aggregation rewrite for {}", other.name()),
                })
            }
        };

        let types: Vec<ColumnType> = if narrowed {
            self.tracked().iter().map(Column::ty).collect()
        } else {
            self.relation.column_types()
        };
        let pre = Relation::new(pre_name.as_str(), &types)
            .with_owners(op.output.owners().iter().copied())
            .into_ref();
        let operator = Operator {
            kind,
            inputs: vec![self.relation.clone()],
            output: pre.clone(),
            paths: op.paths.clone(),
        };

        let remap = |c: &Column, position: usize| {
            if narrowed {
                c.rebind(&pre_name, position)
            } else {
                c.rebind(&pre_name, c.index())
            }
        };
        let keys = self.group_by.keys();
        let agg_column = remap(&self.agg_column, keys.len());
        let group_by = match &self.group_by {
            GroupByType::Global => GroupByType::Global,
            GroupByType::Keyed(keys) => {
                GroupByType::Keyed(keys.iter().enumerate().map(|(i, k)| remap(k, i)).collect())
            }
        };

        debug!(
            obligation = %self,
            passed = %op,
            pre = %pre_name,
            "obligation passed operator"
        );
        self.group_by = group_by;
        self.agg_column = agg_column;
        self.relation = pre;
        self.deferred = op.output.clone();
        Ok(DeferredOperator {
            node: node.id(),
            operator,
        })
    }

    /// Resolve the obligation: the aggregation over the current
    /// pre-aggregation rows, writing the relation downstream operators read.
    pub fn materialize(self) -> Operator {
        debug!(obligation = %self, "materializing");
        Operator {
            kind: OperatorKind::Aggregate {
                func: self.func,
                group_by: self.group_by.keys().to_vec(),
                columns: vec![self.agg_column],
            },
            inputs: vec![self.relation],
            output: self.deferred,
            paths: self.paths,
        }
    }

    fn tracked(&self) -> Vec<Column> {
        let mut cols = self.group_by.keys().to_vec();
        cols.push(self.agg_column.clone());
        cols
    }
}

impl fmt::Display for Obligation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.group_by.keys().iter().map(|k| k.to_string()).collect();
        write!(
            f,
            "{:?} by [{}] over {} as {}",
            self.func,
            keys.join(", "),
            self.agg_column,
            self.deferred.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpcflow_core::expr::{CmpOp, Condition};
    use mpcflow_core::graph::OperatorGraph;
    use mpcflow_core::operator::MathOp;

    /// b(int, str, int) --sum(b.2) by b.0--> c(int, int)
    fn setup() -> (OperatorGraph, NodeId, RelationRef, RelationRef) {
        let b = Relation::new("b", &[ColumnType::Int, ColumnType::Str, ColumnType::Int])
            .with_owners([1])
            .into_ref();
        let c = Relation::new("c", &[ColumnType::Int, ColumnType::Int])
            .with_owners([1])
            .into_ref();
        let mut g = OperatorGraph::new();
        let agg = g.add_node(Operator::new(
            OperatorKind::Aggregate {
                func: AggFunc::Sum,
                group_by: vec![b.columns()[0].clone()],
                columns: vec![b.columns()[2].clone()],
            },
            vec![b.clone()],
            c.clone(),
        ));
        (g, agg, b, c)
    }

    fn downstream(g: &mut OperatorGraph, kind: OperatorKind, input: &RelationRef, out: &str) -> NodeId {
        let arity = input.arity();
        let output = Relation::new(out, &vec![ColumnType::Int; arity]).into_ref();
        g.add_node(Operator::new(kind, vec![input.clone()], output))
    }

    fn select_where(c: &RelationRef, col: usize) -> OperatorKind {
        OperatorKind::Select {
            columns: Vec::new(),
            condition: Some(Condition::compare(CmpOp::Gt, c.columns()[col].clone(), "10")),
        }
    }

    #[test]
    fn lift_maps_keys_then_aggregate() {
        let (g, agg, _, c) = setup();
        let obl = Obligation::new(g.node(agg)).unwrap();
        assert_eq!(obl.lift(&c.columns()[0]).unwrap().to_string(), "b.0");
        assert_eq!(obl.lift(&c.columns()[1]).unwrap().to_string(), "b.2");
        assert!(obl.lift(&Column::new("c", 2, ColumnType::Int)).is_none());
        assert!(obl.lift(&Column::new("z", 0, ColumnType::Int)).is_none());
        assert_eq!(obl.group_by().keys().len(), 1);
    }

    #[test]
    fn filter_on_aggregate_is_a_hard_stop() {
        let (mut g, agg, _, c) = setup();
        let on_value = downstream(&mut g, select_where(&c, 1), &c, "d");
        let on_key = downstream(&mut g, select_where(&c, 0), &c, "e");
        let obl = Obligation::new(g.node(agg)).unwrap();
        assert!(!obl.can_pass_operator(g.node(on_value).op()));
        assert!(obl.can_pass_operator(g.node(on_key).op()));
    }

    #[test]
    fn filter_mixing_key_and_aggregate_is_a_hard_stop() {
        let (mut g, agg, _, c) = setup();
        let both = OperatorKind::Select {
            columns: Vec::new(),
            condition: Some(Condition::And(
                Box::new(Condition::compare(CmpOp::Gt, c.columns()[0].clone(), "1")),
                Box::new(Condition::compare(CmpOp::Gt, c.columns()[1].clone(), "10")),
            )),
        };
        let sel = downstream(&mut g, both, &c, "d");
        let obl = Obligation::new(g.node(agg)).unwrap();
        assert!(!obl.can_pass_operator(g.node(sel).op()));
    }

    #[test]
    fn passing_rebinds_to_latest_schema() {
        let (mut g, agg, _, c) = setup();
        let sel = downstream(&mut g, select_where(&c, 0), &c, "d");
        let mut obl = Obligation::new(g.node(agg)).unwrap();

        let deferred = obl.pass_through(g.node(sel)).unwrap();
        assert_eq!(deferred.operator.to_string(), "select(b -> d_pre)");
        match &deferred.operator.kind {
            OperatorKind::Select { condition, .. } => {
                assert_eq!(condition.as_ref().unwrap().to_string(), "b.0 > 10")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(deferred.operator.output.arity(), 3);

        assert_eq!(obl.deferred_name(), "d");
        assert_eq!(obl.relation().name(), "d_pre");
        assert_eq!(obl.agg_column().to_string(), "d_pre.2");
        // The passed operator reads `c`, which is no longer tracked.
        assert!(!obl.can_pass_operator(g.node(sel).op()));
        assert!(obl.lift(&c.columns()[1]).is_none());
        assert_eq!(
            obl.lift(&Column::new("d", 1, ColumnType::Int)).unwrap().to_string(),
            "d_pre.2"
        );
    }

    #[test]
    fn projection_renumbers_tracked_columns() {
        let (mut g, agg, _, c) = setup();
        let proj = downstream(
            &mut g,
            OperatorKind::Project {
                columns: c.columns().to_vec(),
            },
            &c,
            "p",
        );
        let mut obl = Obligation::new(g.node(agg)).unwrap();
        let deferred = obl.pass_through(g.node(proj)).unwrap();
        assert_eq!(deferred.operator.output.arity(), 2);
        assert_eq!(obl.group_by().keys()[0].to_string(), "p_pre.0");
        assert_eq!(obl.agg_column().to_string(), "p_pre.1");

        let op = obl.materialize();
        assert_eq!(op.to_string(), "aggregate(p_pre -> p)");
    }

    #[test]
    fn arithmetic_rules() {
        let (mut g, agg, _, c) = setup();
        let math = |op, col: usize| OperatorKind::Math {
            op,
            left: Value::Column(c.columns()[col].clone()),
            right: Value::constant("5"),
        };
        let scale = downstream(&mut g, math(MathOp::Mul, 1), &c, "m1");
        let shift = downstream(&mut g, math(MathOp::Add, 1), &c, "m2");
        let key = downstream(&mut g, math(MathOp::Mul, 0), &c, "m3");
        let obl = Obligation::new(g.node(agg)).unwrap();
        assert!(obl.can_pass_operator(g.node(scale).op()));
        assert!(!obl.can_pass_operator(g.node(shift).op()));
        assert!(!obl.can_pass_operator(g.node(key).op()));
    }

    #[test]
    fn illegal_pass_leaves_obligation_intact() {
        let (mut g, agg, _, c) = setup();
        let on_value = downstream(&mut g, select_where(&c, 1), &c, "e");
        let mut obl = Obligation::new(g.node(agg)).unwrap();
        let err = obl.pass_through(g.node(on_value)).unwrap_err();
        assert!(matches!(err, Error::IllegalPassThrough { ref relation, .. } if relation == "c"));
        assert_eq!(obl.deferred_name(), "c");
        assert_eq!(obl.relation().name(), "b");
    }

    struct PermitUnions;

    impl CommutationRules for PermitUnions {
        fn union(&self, _obligation: &Obligation) -> bool {
            true
        }
    }

    #[test]
    fn unlisted_variants_default_to_hard_stop() {
        let (mut g, agg, _, c) = setup();
        let union = downstream(&mut g, OperatorKind::Union, &c, "u");
        let sel = downstream(&mut g, select_where(&c, 1), &c, "d");
        let mut obl = Obligation::new(g.node(agg)).unwrap();
        assert!(!obl.can_pass_operator(g.node(union).op()));
        assert!(obl.can_pass_with(&PermitUnions, g.node(union).op()));
        assert!(!obl.can_pass_with(&PermitUnions, g.node(sel).op()));
        // A permissive rule without a rewrite is still refused.
        let err = obl.pass_through_with(&PermitUnions, g.node(union)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperator { .. }));
    }

    struct PermitJoins;

    impl CommutationRules for PermitJoins {
        fn join(&self, _obligation: &Obligation, _left_key: &Column, _right_key: &Column) -> bool {
            true
        }
    }

    #[test]
    fn multi_input_variants_consult_their_rule() {
        let (mut g, agg, b, c) = setup();
        let other = Relation::new("x", &[ColumnType::Int, ColumnType::Int]).into_ref();
        let join = g.add_node(Operator::new(
            OperatorKind::Join {
                left_key: c.columns()[0].clone(),
                right_key: other.columns()[0].clone(),
            },
            vec![c.clone(), other.clone()],
            Relation::new("j", &[ColumnType::Int; 4]).into_ref(),
        ));
        let union = g.add_node(Operator::new(
            OperatorKind::Union,
            vec![c.clone(), other.clone()],
            Relation::new("u", &[ColumnType::Int; 2]).into_ref(),
        ));
        let unrelated = g.add_node(Operator::new(
            OperatorKind::Union,
            vec![b.clone(), other.clone()],
            Relation::new("v", &[ColumnType::Int; 3]).into_ref(),
        ));
        let obl = Obligation::new(g.node(agg)).unwrap();

        assert!(!obl.can_pass_operator(g.node(join).op()));
        assert!(obl.can_pass_with(&PermitJoins, g.node(join).op()));
        assert!(!obl.can_pass_with(&PermitJoins, g.node(union).op()));

        assert!(!obl.can_pass_operator(g.node(union).op()));
        assert!(obl.can_pass_with(&PermitUnions, g.node(union).op()));
        assert!(!obl.can_pass_with(&PermitUnions, g.node(join).op()));
        // Operators that never read the aggregated rows are not consulted.
        assert!(!obl.can_pass_with(&PermitUnions, g.node(unrelated).op()));
    }

    #[test]
    fn rejects_non_aggregate_origin() {
        let (mut g, _, _, c) = setup();
        let sel = downstream(&mut g, select_where(&c, 1), &c, "d");
        assert!(matches!(
            Obligation::new(g.node(sel)).unwrap_err(),
            Error::Invariant(_)
        ));
    }
}
