//! Relations (named datasets) and the values operators take as parameters.
//!
//! Relations are shared by reference among every operator that reads or
//! writes them and are never mutated after construction.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::PartyId;
use crate::schema::{Column, ColumnType};

pub type RelationRef = Arc<Relation>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    name: String,
    columns: Vec<Column>,
    owners: BTreeSet<PartyId>,
}

impl Relation {
    /// Build a relation whose columns are numbered in the given order.
    pub fn new(name: impl Into<String>, types: &[ColumnType]) -> Self {
        let name = name.into();
        let columns = types
            .iter()
            .enumerate()
            .map(|(i, ty)| Column::new(name.clone(), i, *ty))
            .collect();
        Self {
            name,
            columns,
            owners: BTreeSet::new(),
        }
    }

    pub fn with_owners(mut self, owners: impl IntoIterator<Item = PartyId>) -> Self {
        self.owners = owners.into_iter().collect();
        self
    }

    pub fn into_ref(self) -> RelationRef {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(Column::ty).collect()
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn owners(&self) -> &BTreeSet<PartyId> {
        &self.owners
    }

    pub fn has_owner(&self, party: PartyId) -> bool {
        self.owners.contains(&party)
    }

    /// Comma-separated owner ids, e.g. `"1,3"`.
    pub fn owner_string(&self) -> String {
        self.owners
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// An operator parameter: either a column of some relation or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Column(Column),
    Constant(String),
}

impl Value {
    pub fn constant(text: impl Into<String>) -> Self {
        Value::Constant(text.into())
    }

    pub fn as_column(&self) -> Option<&Column> {
        match self {
            Value::Column(c) => Some(c),
            Value::Constant(_) => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Value::Constant(_))
    }
}

impl From<Column> for Value {
    fn from(c: Column) -> Self {
        Value::Column(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Constant(s.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Column(c) => write!(f, "{c}"),
            Value::Constant(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_indexed_in_declaration_order() {
        let rel = Relation::new("sales", &[ColumnType::Int, ColumnType::Double]);
        assert_eq!(rel.arity(), 2);
        assert_eq!(rel.column(1).unwrap().index(), 1);
        assert_eq!(rel.column(1).unwrap().relation(), "sales");
        assert_eq!(rel.column(1).unwrap().ty(), ColumnType::Double);
    }

    #[test]
    fn owner_string_is_sorted() {
        let rel = Relation::new("r", &[ColumnType::Int]).with_owners([3, 1]);
        assert!(rel.has_owner(1));
        assert!(!rel.has_owner(2));
        assert_eq!(rel.owner_string(), "1,3");
    }
}
