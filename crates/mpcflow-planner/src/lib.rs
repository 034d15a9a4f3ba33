#![forbid(unsafe_code)]
//! mpcflow-planner: YAML documents → `OperatorGraph`.
//!
//! A graph file declares relation schemas and ownership, the externally
//! supplied inputs, and an ordered list of operators. Output schemas are
//! derived when not declared. An optional `config:` section overrides the
//! compiler configuration for this graph.

pub mod dsl;

pub use dsl::yaml::{load_yaml_graph, parse_yaml_graph, GraphDocument, GraphFileConfig};
pub use dsl::DslError;
