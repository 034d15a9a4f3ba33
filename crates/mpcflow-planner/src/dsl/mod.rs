pub mod yaml;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DslError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid graph: {0}")]
    Invalid(String),

    #[error(transparent)]
    Core(#[from] mpcflow_core::error::Error),
}
