#![forbid(unsafe_code)]
//! mpcflow-codegen: backend emitters and the compile driver.
//!
//! Responsibilities:
//! - Compute placeholder values per operator and hand them to a
//!   [`TemplateExpander`] (minijinja-backed by default).
//! - Assemble programs for the secure protocol backend ([`ViffTranslator`])
//!   and the vertex-centric backend ([`GraphChiTranslator`]).
//! - Write the program under the configured code directory and return a
//!   [`CompileManifest`] describing what was produced.

pub mod graphchi;
pub mod lambda;
pub mod program;
pub mod template;
pub mod viff;
pub mod writer;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use mpcflow_core::config::{Backend, CompilerConfig};
use mpcflow_core::error::Result;
use mpcflow_core::graph::OperatorGraph;
use mpcflow_core::hash::{graph_digest, program_digest};
use mpcflow_core::manifest::CompileManifest;

pub use graphchi::GraphChiTranslator;
pub use program::{GeneratedProgram, Translator};
pub use template::{JinjaTemplates, TemplateDict, TemplateExpander};
pub use viff::ViffTranslator;

#[derive(Debug, Clone)]
pub struct CompiledJob {
    pub code: String,
    pub source_path: PathBuf,
    pub manifest: CompileManifest,
}

/// Generate the program text for `config.backend` without touching disk.
pub fn generate<T: TemplateExpander + ?Sized>(
    graph: &OperatorGraph,
    config: &CompilerConfig,
    templates: &T,
) -> Result<GeneratedProgram> {
    config.validate()?;
    graph.validate()?;
    match config.backend {
        Backend::Viff => ViffTranslator::new(graph, config, templates).generate(),
        Backend::GraphChi => GraphChiTranslator::new(graph, config, templates).generate(),
    }
}

/// Generate, write and describe one job.
pub fn compile<T: TemplateExpander + ?Sized>(
    graph: &OperatorGraph,
    config: &CompilerConfig,
    templates: &T,
) -> Result<CompiledJob> {
    let started = now_millis();
    let digest = graph_digest(graph)?;
    let program = generate(graph, config, templates)?;
    let source_path = writer::write_job(
        &config.paths.code_dir,
        &config.class_name,
        config.backend.source_extension(),
        &program.code,
    )?;

    let mut manifest = CompileManifest::new(
        config.backend,
        config.class_name.as_str(),
        config.data_owner_id,
        digest,
        started,
    );
    manifest.inputs = program.inputs;
    manifest.scheduled = program.scheduled;
    manifest.outputs = program.outputs;
    let manifest = manifest.finish(now_millis(), program_digest(&program.code));
    info!(
        id = %manifest.id.0,
        path = %source_path.display(),
        operators = manifest.scheduled.len(),
        "compiled"
    );

    Ok(CompiledJob {
        code: program.code,
        source_path,
        manifest,
    })
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
