//! Per-operator commutation predicates.
//!
//! Carrying an obligation past operator O is legal only if applying O and
//! then the aggregation groups rows the same way as aggregating first and
//! then applying O. Each method answers that for one operator variant; any
//! variant a rule set does not override is a hard stop.

use mpcflow_core::expr::Condition;
use mpcflow_core::operator::{AggFunc, MathOp};
use mpcflow_core::relation::Value;
use mpcflow_core::schema::Column;

use crate::obligation::Obligation;

pub trait CommutationRules {
    fn select(
        &self,
        _obligation: &Obligation,
        _columns: &[Column],
        _condition: Option<&Condition>,
    ) -> bool {
        false
    }

    fn project(&self, _obligation: &Obligation, _columns: &[Column]) -> bool {
        false
    }

    fn math(&self, _obligation: &Obligation, _op: MathOp, _left: &Value, _right: &Value) -> bool {
        false
    }

    fn aggregate(&self, _obligation: &Obligation) -> bool {
        false
    }

    fn join(&self, _obligation: &Obligation, _left_key: &Column, _right_key: &Column) -> bool {
        false
    }

    fn union(&self, _obligation: &Obligation) -> bool {
        false
    }

    fn while_loop(&self, _obligation: &Obligation) -> bool {
        false
    }
}

/// Passes operators that leave group membership and tracked columns intact.
///
/// - select: the predicate reads only group-by keys, so it drops whole
///   groups and never changes what a surviving group aggregates. A filter on
///   the aggregate value must see the finished aggregate. A projection, if
///   any, keeps the aggregated layout unchanged.
/// - project: keeps the aggregated layout unchanged.
/// - arithmetic: never rewrites a key; rewrites the aggregated column only by
///   multiplying a sum with a constant.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupPreserving;

impl GroupPreserving {
    fn keeps_layout(obligation: &Obligation, columns: &[Column]) -> bool {
        columns.is_empty()
            || (columns.len() == obligation.deferred_arity()
                && columns
                    .iter()
                    .enumerate()
                    .all(|(i, c)| c.index() == i && obligation.lift(c).is_some()))
    }
}

impl CommutationRules for GroupPreserving {
    fn select(
        &self,
        obligation: &Obligation,
        columns: &[Column],
        condition: Option<&Condition>,
    ) -> bool {
        let filter_ok = condition.map_or(true, |cond| {
            cond.columns()
                .into_iter()
                .all(|c| obligation.lift(c).is_some_and(|lifted| obligation.is_key(&lifted)))
        });
        filter_ok && Self::keeps_layout(obligation, columns)
    }

    fn project(&self, obligation: &Obligation, columns: &[Column]) -> bool {
        Self::keeps_layout(obligation, columns)
    }

    fn math(&self, obligation: &Obligation, op: MathOp, left: &Value, right: &Value) -> bool {
        let (target, other) = match (left, right) {
            (Value::Column(c), other) => (c, other),
            (Value::Constant(_), Value::Column(c)) => (c, left),
            (Value::Constant(_), Value::Constant(_)) => return false,
        };
        let Some(lifted) = obligation.lift(target) else {
            return false;
        };
        if obligation.is_key(&lifted) {
            return false;
        }
        if let Some(col) = other.as_column() {
            if obligation.lift(col).is_none() {
                return false;
            }
        }
        if lifted == *obligation.agg_column() {
            return op == MathOp::Mul && other.is_constant() && obligation.func() == AggFunc::Sum;
        }
        true
    }
}
