//! Secure multi-party backend.
//!
//! Emits a Python protocol program in a fixed section order:
//! preamble, one fragment per external input, one fragment per scheduled
//! operator, one output fragment per leaf, protocol teardown, main.
//!
//! With `defer_aggregations` set, an aggregate feeding exactly one consumer is
//! held back as an [`Obligation`] and carried past downstream operators that
//! commute with it; it is materialized at the first operator that does not.

use tracing::{debug, info, warn};

use mpcflow_core::config::{Backend, CompilerConfig};
use mpcflow_core::error::{Error, Result};
use mpcflow_core::graph::{OperatorGraph, OperatorNode};
use mpcflow_core::id::NodeId;
use mpcflow_core::operator::{AggFunc, MathOp, Operator, OperatorKind};
use mpcflow_core::relation::{RelationRef, Value};
use mpcflow_core::schema::Column;
use mpcflow_mpc::Obligation;
use mpcflow_sched::{input_relations_and_paths, validate_references, JobCode, ScheduleMode, Scheduler};

use crate::lambda::generate_lambda;
use crate::program::{GeneratedProgram, Translator};
use crate::template::{TemplateDict, TemplateExpander};

pub const IMPORT_AND_UTILS_TEMPLATE: &str = "ImportAndUtilsTemplate.py";
pub const INPUT_TEMPLATE: &str = "InputTemplate.py";
pub const SELECT_TEMPLATE: &str = "SelectTemplate.py";
pub const AGG_TEMPLATE: &str = "AggMPCTemplate.py";
pub const JOIN_TEMPLATE: &str = "JoinMPCTemplate.py";
pub const MATH_TEMPLATE: &str = "MathMPCTemplate.py";
pub const OUTPUT_TEMPLATE: &str = "OutputTemplate.py";
pub const CLOSE_PROTOCOL_TEMPLATE: &str = "CloseProtocolTemplate.py";
pub const MAIN_TEMPLATE: &str = "MainTemplate.py";

pub struct ViffTranslator<'a, T: ?Sized> {
    graph: &'a OperatorGraph,
    config: &'a CompilerConfig,
    templates: &'a T,
}

impl<'a, T: TemplateExpander + ?Sized> ViffTranslator<'a, T> {
    pub fn new(graph: &'a OperatorGraph, config: &'a CompilerConfig, templates: &'a T) -> Self {
        Self {
            graph,
            config,
            templates,
        }
    }

    fn mode(&self) -> ScheduleMode {
        if self.config.strict {
            ScheduleMode::Strict
        } else {
            ScheduleMode::Permissive
        }
    }

    /// Fragment for a single operator.
    pub fn translate_operator(&self, op: &Operator) -> Result<String> {
        match &op.kind {
            OperatorKind::Select { .. } => self.translate_select(op),
            OperatorKind::Aggregate { .. } => {
                let dict = self.aggregate_dict(op)?;
                self.templates.expand(AGG_TEMPLATE, &dict)
            }
            OperatorKind::Join {
                left_key,
                right_key,
            } => self.translate_join(op, left_key, right_key),
            OperatorKind::Math {
                op: math,
                left,
                right,
            } => self.translate_math(op, *math, left, right),
            OperatorKind::Project { .. } => Err(unsupported(op, "projection has no secure fragment")),
            OperatorKind::Union => Err(unsupported(op, "union has no secure fragment")),
            OperatorKind::While { .. } => Err(unsupported(op, "loops are not supported")),
        }
    }

    fn translate_select(&self, op: &Operator) -> Result<String> {
        // Rows are copied through; filtering on shares needs a secure
        // comparison protocol.
        let input = single_input(op)?;
        let dict = TemplateDict::new()
            .with("OUT_REL", op.output_name())
            .with("IN_REL", input.name());
        self.templates.expand(SELECT_TEMPLATE, &dict)
    }

    fn aggregate_dict(&self, op: &Operator) -> Result<TemplateDict> {
        let OperatorKind::Aggregate {
            func,
            group_by,
            columns,
        } = &op.kind
        else {
            return Err(Error::Invariant(format!("{op} is not an aggregate")));
        };
        let input = single_input(op)?;
        let [key] = group_by.as_slice() else {
            return Err(unsupported(op, "exactly one group-by column is required"));
        };
        let [agg] = columns.as_slice() else {
            return Err(unsupported(op, "exactly one aggregated column is required"));
        };
        let agg_op = agg_mpc_op(*func).ok_or_else(|| {
            unsupported(op, format!("aggregate function {} is not available", func.symbol()))
        })?;
        Ok(TemplateDict::new()
            .with("OUT_REL", op.output_name())
            .with("IN_REL", input.name())
            .with("GROUP_BY_COL", key.index().to_string())
            .with("AGG_COL", agg.index().to_string())
            .with("AGG_OP", agg_op))
    }

    fn translate_join(&self, op: &Operator, left_key: &Column, right_key: &Column) -> Result<String> {
        let [left, right] = op.inputs.as_slice() else {
            return Err(Error::Schema(format!("{op} must read exactly two relations")));
        };
        let dict = TemplateDict::new()
            .with("OUT_REL", op.output_name())
            .with("LEFT_REL", left.name())
            .with("RIGHT_REL", right.name())
            .with("LEFT_COL", left_key.index().to_string())
            .with("RIGHT_COL", right_key.index().to_string());
        self.templates.expand(JOIN_TEMPLATE, &dict)
    }

    fn translate_math(&self, op: &Operator, math: MathOp, left: &Value, right: &Value) -> Result<String> {
        let input = single_input(op)?;
        let lambda = generate_lambda(math, input, left, right)?;
        let dict = TemplateDict::new()
            .with("OUT_REL", op.output_name())
            .with("IN_REL", input.name())
            .with("LAMBDA", lambda);
        self.templates.expand(MATH_TEMPLATE, &dict)
    }

    pub fn translate_import_and_utils(&self) -> Result<String> {
        self.templates
            .expand(IMPORT_AND_UTILS_TEMPLATE, &TemplateDict::new())
    }

    /// One fragment per external input. Inputs owned by the compiling party
    /// are read locally; the others are received as shares.
    pub fn translate_inputs(&self, inputs: &[(RelationRef, String)]) -> Result<String> {
        let mut code = String::new();
        for (rel, path) in inputs {
            let owned = rel.has_owner(self.config.data_owner_id);
            debug!(
                relation = rel.name(),
                owners = %rel.owner_string(),
                party = self.config.data_owner_id,
                owned,
                "input ownership"
            );
            let dict = TemplateDict::new()
                .with("REL", rel.name())
                .with("INPUT_PATH", path.as_str())
                .with("INPUT_FLAG", if owned { "True" } else { "False" });
            code.push_str(&self.templates.expand(INPUT_TEMPLATE, &dict)?);
        }
        Ok(code)
    }

    pub fn translate_outputs(&self, leaves: &[NodeId]) -> Result<String> {
        let mut code = String::new();
        for leaf in leaves {
            let op = self.graph.node(*leaf).op();
            let dict = TemplateDict::new()
                .with("REL", op.output_name())
                .with("OUTPUT_PATH", op.output_path());
            code.push_str(&self.templates.expand(OUTPUT_TEMPLATE, &dict)?);
        }
        Ok(code)
    }

    pub fn translate_close_protocol(&self) -> Result<String> {
        self.templates
            .expand(CLOSE_PROTOCOL_TEMPLATE, &TemplateDict::new())
    }

    pub fn translate_main(&self) -> Result<String> {
        let dict = TemplateDict::new().with("VIFF_CONFIG_LOC", self.config.viff_config_loc.as_str());
        self.templates.expand(MAIN_TEMPLATE, &dict)
    }

    fn emit(&self, op: &Operator, written: &mut Vec<String>) -> Result<String> {
        let code = self.translate_operator(op)?;
        written.push(op.output_name().to_string());
        Ok(code)
    }

    fn translate_node(
        &self,
        node: &OperatorNode,
        pending: &mut Option<Obligation>,
        written: &mut Vec<String>,
    ) -> Result<JobCode> {
        let op = node.op();
        let mut code = String::new();

        if let Some(mut obligation) = pending.take() {
            if !op.reads(obligation.deferred_name()) {
                *pending = Some(obligation);
            } else if obligation.can_pass_operator(op) {
                let deferred = obligation.pass_through(node)?;
                code.push_str(&self.emit(&deferred.operator, written)?);
                if node.children().len() == 1 {
                    debug!(obligation = %obligation, after = %op, "aggregation still deferred");
                    *pending = Some(obligation);
                } else {
                    code.push_str(&self.emit(&obligation.materialize(), written)?);
                }
                return Ok(JobCode::new(node.id(), code));
            } else {
                debug!(obligation = %obligation, before = %op, "materializing aggregation");
                code.push_str(&self.emit(&obligation.materialize(), written)?);
            }
        }

        let deferrable = self.config.defer_aggregations
            && pending.is_none()
            && matches!(op.kind, OperatorKind::Aggregate { .. })
            && node.children().len() == 1;
        if deferrable {
            // Reject what this backend cannot aggregate before holding it back.
            self.aggregate_dict(op)?;
            let obligation = Obligation::new(node)?;
            info!(obligation = %obligation, "deferring aggregation");
            *pending = Some(obligation);
            return Ok(JobCode::new(node.id(), code));
        }

        code.push_str(&self.emit(op, written)?);
        Ok(JobCode::new(node.id(), code))
    }
}

impl<'a, T: TemplateExpander + ?Sized> Translator for ViffTranslator<'a, T> {
    fn backend(&self) -> Backend {
        Backend::Viff
    }

    fn generate(&self) -> Result<GeneratedProgram> {
        info!(class = %self.config.class_name, "generating secure protocol");
        let roots = self.graph.roots();
        if self.config.strict {
            validate_references(self.graph, roots)?;
        }

        let resolution = input_relations_and_paths(self.graph, roots);
        let mut code = self.translate_import_and_utils()?;
        code.push_str(&self.translate_inputs(&resolution.inputs)?);

        let mut pending: Option<Obligation> = None;
        let mut written = Vec::new();
        let state = Scheduler::new(self.graph, self.mode()).run(resolution.ready_set(), &mut |node| {
            self.translate_node(node, &mut pending, &mut written)
        })?;
        code.push_str(&state.code());
        if let Some(obligation) = pending.take() {
            warn!(obligation = %obligation, "deferred aggregation has no emitted consumer");
            code.push_str(&self.emit(&obligation.materialize(), &mut written)?);
        }

        code.push_str(&self.translate_outputs(&state.leaves)?);
        code.push_str(&self.translate_close_protocol()?);
        code.push_str(&self.translate_main()?);

        Ok(GeneratedProgram {
            code,
            inputs: resolution
                .input_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            scheduled: written,
            outputs: state
                .leaves
                .iter()
                .map(|id| self.graph.node(*id).op().output_name().to_string())
                .collect(),
        })
    }
}

fn agg_mpc_op(func: AggFunc) -> Option<&'static str> {
    match func {
        AggFunc::Sum => Some("sum"),
        AggFunc::Count | AggFunc::Min | AggFunc::Max => None,
    }
}

fn single_input(op: &Operator) -> Result<&RelationRef> {
    match op.inputs.as_slice() {
        [input] => Ok(input),
        _ => Err(Error::Schema(format!("{op} must read exactly one relation"))),
    }
}

fn unsupported(op: &Operator, reason: impl Into<String>) -> Error {
    Error::UnsupportedOperator {
        backend: Backend::Viff.name(),
        operator: op.to_string(),
        reason: reason.into(),
    }
}
