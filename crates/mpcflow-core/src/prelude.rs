//! Convenient re-exports for downstream crates.

pub use crate::config::{Backend, CompilerConfig};
pub use crate::error::{Error, Result};
pub use crate::expr::{CmpOp, Condition};
pub use crate::graph::{OperatorGraph, OperatorNode};
pub use crate::id::{NodeId, PartyId};
pub use crate::manifest::CompileManifest;
pub use crate::operator::{AggFunc, IoPaths, MathOp, Operator, OperatorKind};
pub use crate::relation::{Relation, RelationRef, Value};
pub use crate::schema::{Column, ColumnType};
