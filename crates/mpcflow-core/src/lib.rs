#![forbid(unsafe_code)]
//! mpcflow-core: shared kernel for the mpcflow compiler.
//!
//! This crate contains only *pure* types and small helpers: the relation
//! catalog, operator variants, and the arena-backed operator graph. There is
//! **no I/O** and **no templating** here.
//!
//! Crates that use this:
//! - mpcflow-sched: resolves external inputs and schedules operators.
//! - mpcflow-mpc: tracks deferred aggregations across operator boundaries.
//! - mpcflow-codegen: turns scheduled operators into backend program text.
//! - mpcflow-planner: builds an `OperatorGraph` from a YAML description.

pub mod config;
pub mod error;
pub mod expr;
pub mod graph;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod operator;
pub mod prelude;
pub mod relation;
pub mod schema;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
