//! Vertex-centric backend.
//!
//! A job is a single root `while` loop whose body follows the gather/apply
//! idiom: joins and projections only shape the edge relation, arithmetic
//! before the aggregate rewrites each incoming edge value, the aggregate
//! combines them per vertex, and arithmetic after it rewrites the vertex
//! value.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use mpcflow_core::config::{Backend, CompilerConfig};
use mpcflow_core::error::{Error, Result};
use mpcflow_core::graph::OperatorGraph;
use mpcflow_core::id::NodeId;
use mpcflow_core::operator::{AggFunc, MathOp, Operator, OperatorKind};
use mpcflow_core::relation::Value;
use mpcflow_core::schema::ColumnType;
use mpcflow_sched::{input_relations_and_paths, validate_references};

use crate::program::{GeneratedProgram, Translator};
use crate::template::{TemplateDict, TemplateExpander};

pub const JOB_TEMPLATE: &str = "JobTemplate.cc";

const EDGE_VAR: &str = "in_edge_val";
const VERTEX_VAR: &str = "ver_val";

#[derive(Debug, Clone, PartialEq, Eq)]
struct VertexProgram {
    pre_group: Vec<String>,
    group: String,
    init: String,
    post_group: Vec<String>,
    vertex_type: &'static str,
    edge_type: &'static str,
    iterations: u32,
    body: Vec<String>,
}

pub struct GraphChiTranslator<'a, T: ?Sized> {
    graph: &'a OperatorGraph,
    config: &'a CompilerConfig,
    templates: &'a T,
}

impl<'a, T: TemplateExpander + ?Sized> GraphChiTranslator<'a, T> {
    pub fn new(graph: &'a OperatorGraph, config: &'a CompilerConfig, templates: &'a T) -> Self {
        Self {
            graph,
            config,
            templates,
        }
    }

    fn analyze(&self) -> Result<VertexProgram> {
        let [root] = self.graph.roots() else {
            let roots: Vec<String> = self
                .graph
                .roots()
                .iter()
                .map(|r| self.graph.node(*r).op().to_string())
                .collect();
            return Err(Error::UnsupportedOperator {
                backend: Backend::GraphChi.name(),
                operator: format!("[{}]", roots.join(", ")),
                reason: "a vertex program needs exactly one root loop".into(),
            });
        };
        let root = self.graph.node(*root);
        let OperatorKind::While { iterations, .. } = &root.op().kind else {
            return Err(unsupported(root.op(), "a vertex program starts at a while loop"));
        };
        if !root.children().is_empty() {
            warn!(root = %root.op(), "operators after the loop are not part of the vertex program");
        }

        let members: Vec<NodeId> = self
            .graph
            .reachable(root.loop_children())
            .into_iter()
            .filter(|id| *id != root.id())
            .collect();
        let after_group = members
            .iter()
            .find(|id| matches!(self.graph.node(**id).op().kind, OperatorKind::Aggregate { .. }))
            .map(|agg| self.downstream_of(*agg, root.id()))
            .unwrap_or_default();

        let mut pre_group = Vec::new();
        let mut post_group = Vec::new();
        let mut aggregate: Option<(AggFunc, ColumnType, ColumnType)> = None;
        let mut body = Vec::new();

        for id in members {
            let op = self.graph.node(id).op();
            match &op.kind {
                OperatorKind::Join { .. } | OperatorKind::Project { .. } => {
                    debug!(op = %op, "structural operator");
                }
                OperatorKind::Math {
                    op: math,
                    left,
                    right,
                } => {
                    if after_group.contains(&id) {
                        post_group.push(math_statement(op, *math, left, right, VERTEX_VAR)?);
                    } else {
                        pre_group.push(math_statement(op, *math, left, right, EDGE_VAR)?);
                    }
                }
                OperatorKind::Aggregate { func, columns, .. } => {
                    if aggregate.is_some() {
                        return Err(unsupported(op, "loop body holds more than one aggregate"));
                    }
                    let [column] = columns.as_slice() else {
                        return Err(unsupported(op, "exactly one aggregated column is required"));
                    };
                    let vertex = op
                        .output
                        .columns()
                        .last()
                        .map(|c| c.ty())
                        .ok_or_else(|| Error::Schema(format!("{op} writes no columns")))?;
                    aggregate = Some((*func, column.ty(), vertex));
                }
                OperatorKind::Select { .. } => {
                    return Err(unsupported(op, "filters have no vertex-program form"))
                }
                OperatorKind::Union => return Err(unsupported(op, "union has no vertex-program form")),
                OperatorKind::While { .. } => return Err(unsupported(op, "nested loops")),
            }
            body.push(op.output_name().to_string());
        }

        let Some((func, edge_ty, vertex_ty)) = aggregate else {
            return Err(unsupported(root.op(), "loop body needs an aggregate"));
        };
        let edge_type = cpp_type(edge_ty)
            .ok_or_else(|| unsupported(root.op(), "edge values must be numeric"))?;
        let vertex_type = cpp_type(vertex_ty)
            .ok_or_else(|| unsupported(root.op(), "vertex values must be numeric"))?;
        let (init, group) = gather(func);

        Ok(VertexProgram {
            pre_group,
            group,
            init,
            post_group,
            vertex_type,
            edge_type,
            iterations: iterations.unwrap_or(self.config.default_iterations),
            body,
        })
    }

    /// Nodes fed by `from` over ordinary edges, not crossing back into `stop`.
    fn downstream_of(&self, from: NodeId, stop: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.graph.node(from).children().iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if id == stop || !seen.insert(id) {
                continue;
            }
            queue.extend(self.graph.node(id).children().iter().copied());
        }
        seen
    }
}

impl<'a, T: TemplateExpander + ?Sized> Translator for GraphChiTranslator<'a, T> {
    fn backend(&self) -> Backend {
        Backend::GraphChi
    }

    fn generate(&self) -> Result<GeneratedProgram> {
        let roots = self.graph.roots();
        if self.config.strict {
            validate_references(self.graph, roots)?;
        }
        let program = self.analyze()?;
        let resolution = input_relations_and_paths(self.graph, roots);
        let edges = resolution
            .inputs
            .first()
            .map(|(rel, _)| rel.name().to_string())
            .ok_or_else(|| Error::Schema("vertex program reads no edge relation".into()))?;
        info!(
            class = %self.config.class_name,
            %edges,
            iterations = program.iterations,
            "generating vertex program"
        );

        let dict = TemplateDict::new()
            .with("CLASS_NAME", self.config.class_name.as_str())
            .with("VERTEX_DATA_TYPE", program.vertex_type)
            .with("EDGE_DATA_TYPE", program.edge_type)
            .with("INIT_VER_VAL", program.init.as_str())
            .with("PRE_GROUP_VERTEX_VAL", program.pre_group.join("\n      "))
            .with("GROUP_VERTEX_VAL", program.group.as_str())
            .with("POST_GROUP_VERTEX_VAL", program.post_group.join("\n    "))
            .with("EDGES_PATH", format!("/{edges}/"))
            .with("N_ITERS", program.iterations.to_string());
        let code = self.templates.expand(JOB_TEMPLATE, &dict)?;

        let outputs = roots
            .iter()
            .map(|r| self.graph.node(*r).op().output_name().to_string())
            .collect();
        Ok(GeneratedProgram {
            code,
            inputs: resolution
                .input_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            scheduled: program.body,
            outputs,
        })
    }
}

fn math_statement(op: &Operator, math: MathOp, left: &Value, right: &Value, var: &str) -> Result<String> {
    if left.is_constant() && right.is_constant() {
        return Err(Error::MultipleConstants {
            relation: op.output_name().to_string(),
        });
    }
    let render = |v: &Value| match v {
        Value::Column(_) => var.to_string(),
        Value::Constant(text) => text.clone(),
    };
    Ok(format!(
        "{var} = {} {} {};",
        render(left),
        math.symbol(),
        render(right)
    ))
}

/// Initial vertex value and the per-edge combine statement.
fn gather(func: AggFunc) -> (String, String) {
    match func {
        AggFunc::Sum => ("0".into(), format!("{VERTEX_VAR} += {EDGE_VAR};")),
        AggFunc::Count => ("0".into(), format!("{VERTEX_VAR} += 1;")),
        AggFunc::Min => (
            "std::numeric_limits<VertexDataType>::max()".into(),
            format!("{VERTEX_VAR} = std::min({VERTEX_VAR}, {EDGE_VAR});"),
        ),
        AggFunc::Max => (
            "std::numeric_limits<VertexDataType>::lowest()".into(),
            format!("{VERTEX_VAR} = std::max({VERTEX_VAR}, {EDGE_VAR});"),
        ),
    }
}

fn cpp_type(ty: ColumnType) -> Option<&'static str> {
    match ty {
        ColumnType::Int => Some("int"),
        ColumnType::Double => Some("double"),
        ColumnType::Bool => Some("bool"),
        ColumnType::Str => None,
    }
}

fn unsupported(op: &Operator, reason: &str) -> Error {
    Error::UnsupportedOperator {
        backend: Backend::GraphChi.name(),
        operator: op.to_string(),
        reason: reason.to_string(),
    }
}
