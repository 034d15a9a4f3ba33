//! Predicate trees for select and while operators.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::relation::Value;
use crate::schema::Column;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Compare { op: CmpOp, left: Value, right: Value },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(op: CmpOp, left: impl Into<Value>, right: impl Into<Value>) -> Self {
        Condition::Compare {
            op,
            left: left.into(),
            right: right.into(),
        }
    }

    /// Every column referenced anywhere in the tree, in left-to-right order.
    pub fn columns(&self) -> Vec<&Column> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a Column>) {
        match self {
            Condition::Compare { left, right, .. } => {
                out.extend(left.as_column());
                out.extend(right.as_column());
            }
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Condition::Not(c) => c.collect_columns(out),
        }
    }

    /// Rewrite every column reference through `f`; `None` aborts the rewrite.
    pub fn try_map_columns<F>(&self, f: &mut F) -> Option<Condition>
    where
        F: FnMut(&Column) -> Option<Column>,
    {
        let map_value = |v: &Value, f: &mut F| -> Option<Value> {
            match v {
                Value::Column(c) => f(c).map(Value::Column),
                Value::Constant(_) => Some(v.clone()),
            }
        };
        Some(match self {
            Condition::Compare { op, left, right } => Condition::Compare {
                op: *op,
                left: map_value(left, f)?,
                right: map_value(right, f)?,
            },
            Condition::And(a, b) => {
                Condition::And(Box::new(a.try_map_columns(f)?), Box::new(b.try_map_columns(f)?))
            }
            Condition::Or(a, b) => {
                Condition::Or(Box::new(a.try_map_columns(f)?), Box::new(b.try_map_columns(f)?))
            }
            Condition::Not(c) => Condition::Not(Box::new(c.try_map_columns(f)?)),
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
            Condition::And(a, b) => write!(f, "({a} && {b})"),
            Condition::Or(a, b) => write!(f, "({a} || {b})"),
            Condition::Not(c) => write!(f, "!({c})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    #[test]
    fn columns_walks_nested_trees() {
        let a = Column::new("r", 0, ColumnType::Int);
        let b = Column::new("r", 2, ColumnType::Int);
        let cond = Condition::And(
            Box::new(Condition::compare(CmpOp::Gt, a.clone(), "3")),
            Box::new(Condition::Not(Box::new(Condition::compare(
                CmpOp::Eq,
                "1",
                b.clone(),
            )))),
        );
        assert_eq!(cond.columns(), vec![&a, &b]);
        assert_eq!(cond.to_string(), "(r.0 > 3 && !(1 == r.2))");
    }

    #[test]
    fn try_map_columns_aborts_on_missing_column() {
        let a = Column::new("r", 0, ColumnType::Int);
        let cond = Condition::compare(CmpOp::Lt, a, "10");
        let moved = cond.try_map_columns(&mut |c| Some(c.rebind("s", 4)));
        assert_eq!(moved.unwrap().columns()[0].to_string(), "s.4");
        assert!(cond.try_map_columns(&mut |_| None).is_none());
    }
}
