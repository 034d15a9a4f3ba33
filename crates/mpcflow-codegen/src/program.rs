//! What a backend emitter hands back to the driver.

use mpcflow_core::config::Backend;
use mpcflow_core::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedProgram {
    /// Assembled program text.
    pub code: String,
    /// External inputs, in the order their fragments were emitted.
    pub inputs: Vec<String>,
    /// Relations written by emitted operators, in emission order.
    pub scheduled: Vec<String>,
    /// Exported relations.
    pub outputs: Vec<String>,
}

pub trait Translator {
    fn backend(&self) -> Backend;

    fn generate(&self) -> Result<GeneratedProgram>;
}
