//! Compile manifest for audit: what was compiled, for whom, and what came out.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Backend;
use crate::hash::Digest;
use crate::id::PartyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileManifest {
    pub id: ManifestId,

    pub backend: Backend,
    pub class_name: String,
    pub data_owner_id: PartyId,

    /// Digest of the input graph.
    pub graph_digest: Digest,

    /// Digest of the assembled program text.
    pub program_digest: Option<Digest>,

    /// External inputs in the order their fragments were emitted.
    pub inputs: Vec<String>,

    /// Operator outputs in scheduling order.
    pub scheduled: Vec<String>,

    /// Exported relations.
    pub outputs: Vec<String>,

    /// Compiler version string for provenance.
    pub compiler_version: String,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl CompileManifest {
    pub fn new(
        backend: Backend,
        class_name: impl Into<String>,
        data_owner_id: PartyId,
        graph_digest: Digest,
        started_ms: u64,
    ) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            backend,
            class_name: class_name.into(),
            data_owner_id,
            graph_digest,
            program_digest: None,
            inputs: Vec::new(),
            scheduled: Vec::new(),
            outputs: Vec::new(),
            compiler_version: crate::VERSION.to_string(),
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, program_digest: Digest) -> Self {
        self.finished_ms = finished_ms;
        self.program_digest = Some(program_digest);
        self
    }
}
