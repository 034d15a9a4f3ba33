#![forbid(unsafe_code)]
//! mpcflow-sched: graph algorithms that run before any code is generated.
//!
//! Responsibilities:
//! - Classify every relation a graph reads as external input or internally
//!   produced, and compute storage paths for the external ones.
//! - Walk the graph in producer-before-consumer order, handing each operator
//!   to a backend translator exactly once and collecting the leaves.
//! - Provide debug-time verification helpers.
//!
//! **No I/O, no templating** here. The codegen crate drives these passes.

pub mod resolve;
pub mod schedule;
pub mod verify;

pub use resolve::{
    determine_inputs, input_relations_and_paths, validate_references, InputResolution,
    ReadinessResolution,
};
pub use schedule::{can_schedule, translate_dag, JobCode, ScheduleMode, ScheduleState, Scheduler};
