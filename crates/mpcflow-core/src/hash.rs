//! Stable digests of operator graphs and generated programs.
//!
//! Two compilations of the same graph under the same config must produce the
//! same program digest; the manifest records both so runs can be compared.

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::OperatorGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Digest of generated program text.
pub fn program_digest(code: &str) -> Digest {
    Digest(blake3::hash(code.as_bytes()).into())
}

/// Digest of a graph's serialized form (nodes, edges, roots, declared inputs).
pub fn graph_digest(graph: &OperatorGraph) -> Result<Digest> {
    let bytes = serde_json::to_vec(graph).map_err(|e| Error::Hash(e.to_string()))?;
    let mut h = Hasher::new();
    h.update(&bytes);
    Ok(Digest(h.finalize().into()))
}
