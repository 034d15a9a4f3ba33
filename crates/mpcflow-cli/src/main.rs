//! mpcflow CLI: compile operator graphs to backend programs.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpcflow_codegen::{compile, JinjaTemplates};
use mpcflow_core::config::{with_trailing_slash, Backend, CompilerConfig};
use mpcflow_core::graph::OperatorGraph;
use mpcflow_core::id::PartyId;
use mpcflow_planner::parse_yaml_graph;
use mpcflow_sched::{determine_inputs, input_relations_and_paths, JobCode, ScheduleMode, Scheduler};

#[derive(Parser)]
#[command(name = "mpcflow")]
#[command(about = "Compile relational dataflow graphs to MPC and vertex-centric programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and write the program for a graph
    Compile {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,

        /// Write the compile manifest (JSON) to this path
        #[arg(long)]
        manifest: Option<PathBuf>,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    /// Parse the graph and check every relation is produced or declared
    Validate {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// Show inputs, scheduling order and exports without generating code
    Explain {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

/// Flags that take precedence over the environment and the graph file.
#[derive(Args, Debug, Default, Clone)]
struct ConfigOverrides {
    /// Target backend (viff | graphchi)
    #[arg(long)]
    backend: Option<Backend>,

    /// Job class name
    #[arg(long)]
    class_name: Option<String>,

    /// Directory with template overrides
    #[arg(long)]
    templates_dir: Option<String>,

    /// Directory generated code is written under
    #[arg(long)]
    code_dir: Option<String>,

    /// Input data directory
    #[arg(long)]
    input_dir: Option<String>,

    /// Output data directory
    #[arg(long)]
    output_dir: Option<String>,

    /// Party the program is compiled for
    #[arg(long)]
    data_owner: Option<PartyId>,

    /// MPC connection config location
    #[arg(long)]
    viff_config: Option<String>,

    /// Fail on stranded operators and unresolved relations
    #[arg(long)]
    strict: bool,

    /// Push aggregations past commuting operators
    #[arg(long)]
    defer_aggregations: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mpcflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            graph,
            manifest,
            overrides,
        } => {
            if let Err(e) = compile_graph(&graph, manifest.as_deref(), &overrides) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { graph } => {
            if let Err(e) = validate_graph(&graph) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Graph is valid");
        }
        Commands::Explain { graph, overrides } => {
            if let Err(e) = explain_graph(&graph, &overrides) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Environment, then the graph file's `config:` section, then flags.
fn load(
    path: &Path,
    overrides: &ConfigOverrides,
) -> Result<(OperatorGraph, CompilerConfig), Box<dyn std::error::Error>> {
    let yaml = fs::read_to_string(path)?;
    let doc = parse_yaml_graph(&yaml)?;
    let mut config = CompilerConfig::from_env();
    if let Some(ref file_cfg) = doc.config {
        file_cfg.apply(&mut config);
    }
    apply_cli_overrides(&mut config, overrides);
    config.validate()?;
    let graph = doc.build(&config.paths)?;
    Ok((graph, config))
}

fn compile_graph(
    path: &Path,
    manifest_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let (graph, config) = load(path, overrides)?;
    let templates = JinjaTemplates::load(config.templates_dir.as_deref())?;
    let job = compile(&graph, &config, &templates)?;

    if let Some(out) = manifest_path {
        fs::write(out, serde_json::to_string_pretty(&job.manifest)?)?;
        info!(path = %out.display(), "wrote manifest");
    }

    println!("✓ Compiled {} for {}", config.class_name, config.backend.name());
    println!("  Source: {}", job.source_path.display());
    println!("  Inputs: {}", job.manifest.inputs.join(", "));
    println!("  Outputs: {}", job.manifest.outputs.join(", "));
    if let Some(digest) = job.manifest.program_digest.as_ref() {
        println!("  Program hash: {}", digest);
    }
    Ok(())
}

fn validate_graph(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let yaml = fs::read_to_string(path)?;
    let doc = parse_yaml_graph(&yaml)?;
    let graph = doc.build(&CompilerConfig::default().paths)?;
    mpcflow_sched::validate_references(&graph, graph.roots())?;
    Ok(())
}

fn explain_graph(path: &Path, overrides: &ConfigOverrides) -> Result<(), Box<dyn std::error::Error>> {
    let (graph, config) = load(path, overrides)?;
    let roots = graph.roots();
    let resolution = input_relations_and_paths(&graph, roots);
    let readiness = determine_inputs(&graph, roots);
    let mode = if config.strict {
        ScheduleMode::Strict
    } else {
        ScheduleMode::Permissive
    };
    let state = Scheduler::new(&graph, mode).run(resolution.ready_set(), &mut |node| {
        Ok(JobCode::new(node.id(), String::new()))
    })?;

    println!("Compilation Plan");
    println!("================");
    println!();
    println!("Backend: {}", config.backend.name());
    println!("Class: {}", config.class_name);
    println!();
    println!("External Inputs:");
    for (rel, input_path) in &resolution.inputs {
        let owned = rel.has_owner(config.data_owner_id);
        println!(
            "  {} <- {} (owners: [{}]{})",
            rel.name(),
            input_path,
            rel.owner_string(),
            if owned { ", local" } else { "" }
        );
    }
    println!();
    println!("Readiness Order:");
    for (i, id) in readiness.order.iter().enumerate() {
        println!("  {}. {}", i + 1, graph.node(*id).op());
    }
    println!();
    println!("Schedule:");
    for (i, id) in state.order().iter().enumerate() {
        println!("  {}. {}", i + 1, graph.node(*id).op());
    }
    println!();
    println!("Exports:");
    for leaf in &state.leaves {
        let op = graph.node(*leaf).op();
        println!("  {} -> {}", op.output_name(), op.output_path());
    }
    let stranded = mpcflow_sched::schedule::stranded(&graph, roots, &state.processed);
    if !stranded.is_empty() {
        println!();
        println!("Never scheduled: {}", stranded.join(", "));
    }
    Ok(())
}

fn apply_cli_overrides(cfg: &mut CompilerConfig, flags: &ConfigOverrides) {
    if let Some(b) = flags.backend {
        cfg.backend = b;
    }
    if let Some(ref name) = flags.class_name {
        cfg.class_name = name.clone();
    }
    if let Some(ref dir) = flags.templates_dir {
        cfg.templates_dir = Some(dir.clone());
    }
    if let Some(ref dir) = flags.code_dir {
        cfg.paths.code_dir = with_trailing_slash(dir.clone());
    }
    if let Some(ref dir) = flags.input_dir {
        cfg.paths.input_dir = with_trailing_slash(dir.clone());
    }
    if let Some(ref dir) = flags.output_dir {
        cfg.paths.output_dir = with_trailing_slash(dir.clone());
    }
    if let Some(id) = flags.data_owner {
        cfg.data_owner_id = id;
    }
    if let Some(ref loc) = flags.viff_config {
        cfg.viff_config_loc = loc.clone();
    }
    if flags.strict {
        cfg.strict = true;
    }
    if flags.defer_aggregations {
        cfg.defer_aggregations = true;
    }
}
