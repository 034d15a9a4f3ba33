use thiserror::Error;

/// Canonical result for the compiler crates.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("unresolved dependency: relation '{relation}' is read by '{consumer}' but never produced or declared as input")]
    UnresolvedDependency { relation: String, consumer: String },

    #[error("unschedulable operators (inputs never became ready): {}", outputs.join(", "))]
    Unschedulable { outputs: Vec<String> },

    #[error("{backend} backend cannot translate {operator}: {reason}")]
    UnsupportedOperator {
        backend: &'static str,
        operator: String,
        reason: String,
    },

    #[error("obligation for '{relation}' cannot pass {operator}")]
    IllegalPassThrough { relation: String, operator: String },

    #[error("arithmetic operator on '{relation}' has two constant operands")]
    MultipleConstants { relation: String },

    #[error("cycle over ordinary edges through '{0}'")]
    Cycle(String),

    #[error("relation '{0}' is produced by more than one operator")]
    DuplicateOutput(String),

    #[error("Template error: {0}")]
    Template(String),

    // The core crate does no I/O; the writer maps its I/O errors into this.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
