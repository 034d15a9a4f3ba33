#![forbid(unsafe_code)]
//! mpcflow-mpc: deferred aggregations for the secure backend.
//!
//! An aggregation in secret-shared computation is expensive, so the emitter
//! may postpone it past downstream operators as long as each of them commutes
//! with the pending aggregation. An [`Obligation`] is that pending
//! aggregation; [`CommutationRules`] decides, operator by operator, whether it
//! can be carried further.
//!
//! Obligations are owned values threaded through one translation pass; they
//! are never shared.

pub mod obligation;
pub mod rules;

pub use obligation::{GroupByType, Obligation};
pub use rules::{CommutationRules, GroupPreserving};
