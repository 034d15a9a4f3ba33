//! Column types and column references. Pure data.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Double,
    Bool,
    Str,
}

/// A column of exactly one relation, addressed by its position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    relation: String,
    index: usize,
    ty: ColumnType,
}

impl Column {
    pub fn new(relation: impl Into<String>, index: usize, ty: ColumnType) -> Self {
        Self {
            relation: relation.into(),
            index,
            ty,
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ty(&self) -> ColumnType {
        self.ty
    }

    /// Same column position and type, re-homed onto another relation.
    pub fn rebind(&self, relation: &str, index: usize) -> Self {
        Self::new(relation, index, self.ty)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.relation, self.index)
    }
}
