//! Operator variants. The set is closed: every compiler pass matches on
//! `OperatorKind` exhaustively, so adding a variant is a compile error at
//! each site that has to learn about it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::expr::Condition;
use crate::relation::{Relation, RelationRef, Value};
use crate::schema::Column;

/// Aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Count,
    Min,
    Max,
}

impl AggFunc {
    /// Operator symbol as written in the relational front end.
    pub fn symbol(self) -> &'static str {
        match self {
            AggFunc::Sum => "+",
            AggFunc::Count => "count",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }
}

/// Binary arithmetic applied element-wise to one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl MathOp {
    pub fn symbol(self) -> &'static str {
        match self {
            MathOp::Add => "+",
            MathOp::Sub => "-",
            MathOp::Mul => "*",
            MathOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorKind {
    /// Filter rows by `condition`, then keep `columns` (all when empty).
    Select {
        columns: Vec<Column>,
        condition: Option<Condition>,
    },
    Project {
        columns: Vec<Column>,
    },
    /// Output layout: group-by columns in order, then one column per aggregate.
    Aggregate {
        func: AggFunc,
        group_by: Vec<Column>,
        columns: Vec<Column>,
    },
    /// Output layout: all left columns, then the right columns minus the key.
    Join {
        left_key: Column,
        right_key: Column,
    },
    /// Output layout equals the input layout; the target column is rewritten.
    Math {
        op: MathOp,
        left: Value,
        right: Value,
    },
    Union,
    /// Iterative construct; its body hangs off loop edges.
    While {
        condition: Option<Condition>,
        iterations: Option<u32>,
    },
}

impl OperatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Select { .. } => "select",
            OperatorKind::Project { .. } => "project",
            OperatorKind::Aggregate { .. } => "aggregate",
            OperatorKind::Join { .. } => "join",
            OperatorKind::Math { op, .. } => match op {
                MathOp::Add => "add",
                MathOp::Sub => "sub",
                MathOp::Mul => "mul",
                MathOp::Div => "div",
            },
            OperatorKind::Union => "union",
            OperatorKind::While { .. } => "while",
        }
    }
}

/// Where an operator's inputs are read from, its output written to, and its
/// generated code placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoPaths {
    pub input_dir: String,
    pub output_dir: String,
    pub code_dir: String,
}

impl Default for IoPaths {
    fn default() -> Self {
        Self {
            input_dir: "/tmp/mpcflow/input/".to_string(),
            output_dir: "/tmp/mpcflow/output/".to_string(),
            code_dir: "/tmp/mpcflow/code/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub kind: OperatorKind,
    pub inputs: Vec<RelationRef>,
    pub output: RelationRef,
    pub paths: IoPaths,
}

impl Operator {
    pub fn new(kind: OperatorKind, inputs: Vec<RelationRef>, output: RelationRef) -> Self {
        Self {
            kind,
            inputs,
            output,
            paths: IoPaths::default(),
        }
    }

    pub fn with_paths(mut self, paths: IoPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn output_name(&self) -> &str {
        self.output.name()
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|r| r.name())
    }

    pub fn reads(&self, relation: &str) -> bool {
        self.input_names().any(|n| n == relation)
    }

    pub fn is_while(&self) -> bool {
        matches!(self.kind, OperatorKind::While { .. })
    }

    /// Storage location an external input is read from.
    pub fn input_path(&self, relation: &Relation) -> String {
        format!("{}{}/", self.paths.input_dir, relation.name())
    }

    pub fn output_path(&self) -> String {
        format!("{}{}/", self.paths.output_dir, self.output.name())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs: Vec<&str> = self.input_names().collect();
        write!(
            f,
            "{}({} -> {})",
            self.name(),
            inputs.join(", "),
            self.output_name()
        )
    }
}
