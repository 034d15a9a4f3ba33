//! Secure backend: program assembly, arithmetic lambdas and aggregation deferral

use mpcflow_codegen::lambda::generate_lambda;
use mpcflow_codegen::{
    generate, JinjaTemplates, TemplateDict, TemplateExpander, Translator, ViffTranslator,
};
use mpcflow_core::config::CompilerConfig;
use mpcflow_core::error::{Error, Result};
use mpcflow_core::expr::{CmpOp, Condition};
use mpcflow_core::graph::OperatorGraph;
use mpcflow_core::id::NodeId;
use mpcflow_core::operator::{AggFunc, MathOp, Operator, OperatorKind};
use mpcflow_core::relation::{Relation, RelationRef, Value};
use mpcflow_core::schema::ColumnType;
use mpcflow_mpc::Obligation;
use mpcflow_sched::{input_relations_and_paths, JobCode, ScheduleMode, Scheduler};

/// Renders each template as one line: its name, then the placeholders it was
/// given, in key order.
struct Recorder;

impl TemplateExpander for Recorder {
    fn expand(&self, name: &str, dict: &TemplateDict) -> Result<String> {
        let mut line = name.to_string();
        for (key, value) in dict.iter() {
            line.push_str(&format!(" {key}={value}"));
        }
        line.push('\n');
        Ok(line)
    }
}

fn ints(name: &str, arity: usize) -> RelationRef {
    Relation::new(name, &vec![ColumnType::Int; arity])
        .with_owners([1])
        .into_ref()
}

fn template_names(code: &str) -> Vec<&str> {
    code.lines()
        .map(|l| l.split(' ').next().unwrap_or_default())
        .collect()
}

fn sum_by_first(input: &RelationRef, output: &str) -> Operator {
    Operator::new(
        OperatorKind::Aggregate {
            func: AggFunc::Sum,
            group_by: vec![input.columns()[0].clone()],
            columns: vec![input.columns()[1].clone()],
        },
        vec![input.clone()],
        ints(output, 2),
    )
}

fn filter(input: &RelationRef, column: usize, output: &str) -> Operator {
    Operator::new(
        OperatorKind::Select {
            columns: Vec::new(),
            condition: Some(Condition::compare(
                CmpOp::Gt,
                input.columns()[column].clone(),
                "10",
            )),
        },
        vec![input.clone()],
        ints(output, 2),
    )
}

/// A -> Select(A->B) -> Aggregate(B->C)
fn select_then_aggregate() -> (OperatorGraph, NodeId, NodeId) {
    let a = ints("A", 2);
    let mut g = OperatorGraph::new();
    let select = g.add_node(filter(&a, 1, "B"));
    let b = g.node(select).op().output.clone();
    let agg = g.add_node(sum_by_first(&b, "C"));
    g.add_edge(select, agg);
    g.infer_roots();
    (g, select, agg)
}

/// A -> Aggregate(A->B) -> Select(B->C), filtering on column `column` of B.
fn aggregate_then_select(column: usize) -> (OperatorGraph, NodeId, NodeId) {
    let a = ints("A", 2);
    let mut g = OperatorGraph::new();
    let agg = g.add_node(sum_by_first(&a, "B"));
    let b = g.node(agg).op().output.clone();
    let select = g.add_node(filter(&b, column, "C"));
    g.add_edge(agg, select);
    g.infer_roots();
    (g, agg, select)
}

#[test]
fn test_select_aggregate_program_layout() {
    let (g, select, agg) = select_then_aggregate();

    let resolution = input_relations_and_paths(&g, g.roots());
    assert_eq!(resolution.input_names(), vec!["A"]);
    let state = Scheduler::new(&g, ScheduleMode::Strict)
        .run(resolution.ready_set(), &mut |node| {
            Ok(JobCode::new(node.id(), String::new()))
        })
        .unwrap();
    assert_eq!(state.order(), vec![select, agg]);
    assert_eq!(state.leaves, vec![agg]);

    let cfg = CompilerConfig::default();
    let program = ViffTranslator::new(&g, &cfg, &Recorder).generate().unwrap();
    assert_eq!(
        template_names(&program.code),
        vec![
            "ImportAndUtilsTemplate.py",
            "InputTemplate.py",
            "SelectTemplate.py",
            "AggMPCTemplate.py",
            "OutputTemplate.py",
            "CloseProtocolTemplate.py",
            "MainTemplate.py",
        ]
    );
    let lines: Vec<&str> = program.code.lines().collect();
    assert_eq!(
        lines[1],
        "InputTemplate.py INPUT_FLAG=True INPUT_PATH=/tmp/mpcflow/input/A/ REL=A"
    );
    assert_eq!(lines[2], "SelectTemplate.py IN_REL=A OUT_REL=B");
    assert_eq!(
        lines[3],
        "AggMPCTemplate.py AGG_COL=1 AGG_OP=sum GROUP_BY_COL=0 IN_REL=B OUT_REL=C"
    );
    assert_eq!(
        lines[4],
        "OutputTemplate.py OUTPUT_PATH=/tmp/mpcflow/output/C/ REL=C"
    );
    assert_eq!(program.inputs, vec!["A"]);
    assert_eq!(program.scheduled, vec!["B", "C"]);
    assert_eq!(program.outputs, vec!["C"]);
}

#[test]
fn test_select_aggregate_renders_with_builtin_templates() {
    let (g, _, _) = select_then_aggregate();
    let cfg = CompilerConfig {
        viff_config_loc: "/etc/mpc/player-1.ini".into(),
        ..CompilerConfig::default()
    };
    let templates = JinjaTemplates::builtin().unwrap();
    let program = generate(&g, &cfg, &templates).unwrap();

    let needles = [
        "class Protocol(object):",
        "self.rels[\"A\"] = self.input(\"A\", \"/tmp/mpcflow/input/A/\", True)",
        "self.rels[\"B\"] = list(self.rels[\"A\"])",
        "self.rels[\"C\"] = self.aggregate(self.rels[\"B\"], 0, 1, sum)",
        "self.output(self.rels[\"C\"], \"/tmp/mpcflow/output/C/\")",
        "self.runtime.shutdown()",
        "load_config(\"/etc/mpc/player-1.ini\")",
    ];
    let mut last = 0;
    for needle in needles {
        let at = program.code[last..]
            .find(needle)
            .unwrap_or_else(|| panic!("{needle} missing or out of order"));
        last += at + needle.len();
    }
}

#[test]
fn test_unowned_input_is_received_as_shares() {
    let (g, _, _) = select_then_aggregate();
    let cfg = CompilerConfig {
        data_owner_id: 2,
        ..CompilerConfig::default()
    };
    let program = ViffTranslator::new(&g, &cfg, &Recorder).generate().unwrap();
    assert!(program.code.contains("INPUT_FLAG=False"));
}

#[test]
fn test_arithmetic_lambda_passes_other_columns_through() {
    let rel = Relation::new("r", &[ColumnType::Int, ColumnType::Int, ColumnType::Int]);
    let lambda = generate_lambda(
        MathOp::Mul,
        &rel,
        &Value::Column(rel.columns()[0].clone()),
        &Value::constant("5"),
    )
    .unwrap();
    assert_eq!(lambda, "lambda e1, e2, e3: [e1 * 5, e2, e3]");
}

#[test]
fn test_pass_through_tracks_the_latest_schema() {
    let (g, agg, select) = aggregate_then_select(0);
    let mut obligation = Obligation::new(g.node(agg)).unwrap();
    let op = g.node(select).op();
    assert!(obligation.can_pass_operator(op));

    let b1 = op.inputs[0].columns()[1].clone();
    assert_eq!(obligation.lift(&b1).unwrap().to_string(), "A.1");

    let deferred = obligation.pass_through(g.node(select)).unwrap();
    assert_eq!(deferred.node, select);
    assert_eq!(deferred.operator.to_string(), "select(A -> C_pre)");

    // The obligation now answers for C, not B.
    assert_eq!(obligation.deferred_name(), "C");
    assert_eq!(obligation.relation().name(), "C_pre");
    assert!(obligation.lift(&b1).is_none());
    assert!(!obligation.can_pass_operator(op));
    let c1 = op.output.columns()[1].clone();
    assert_eq!(obligation.lift(&c1).unwrap().to_string(), "C_pre.1");
    assert_eq!(obligation.materialize().to_string(), "aggregate(C_pre -> C)");
}

#[test]
fn test_deferred_aggregate_is_emitted_after_legal_select() {
    // A filter on the group key drops whole groups and leaves every sum intact.
    let (g, _, _) = aggregate_then_select(0);
    let cfg = CompilerConfig {
        defer_aggregations: true,
        ..CompilerConfig::default()
    };
    let program = ViffTranslator::new(&g, &cfg, &Recorder).generate().unwrap();
    let lines: Vec<&str> = program.code.lines().collect();
    assert_eq!(lines[2], "SelectTemplate.py IN_REL=A OUT_REL=C_pre");
    assert_eq!(
        lines[3],
        "AggMPCTemplate.py AGG_COL=1 AGG_OP=sum GROUP_BY_COL=0 IN_REL=C_pre OUT_REL=C"
    );
    assert_eq!(program.scheduled, vec!["C_pre", "C"]);
    assert!(!program.scheduled.contains(&"B".to_string()));
    assert_eq!(program.outputs, vec!["C"]);
}

#[test]
fn test_illegal_select_forces_materialization() {
    // Filtering on the sum must see the finished aggregate, not raw rows.
    let (g, _, _) = aggregate_then_select(1);
    let cfg = CompilerConfig {
        defer_aggregations: true,
        ..CompilerConfig::default()
    };
    let program = ViffTranslator::new(&g, &cfg, &Recorder).generate().unwrap();
    let lines: Vec<&str> = program.code.lines().collect();
    assert_eq!(
        lines[2],
        "AggMPCTemplate.py AGG_COL=1 AGG_OP=sum GROUP_BY_COL=0 IN_REL=A OUT_REL=B"
    );
    assert_eq!(lines[3], "SelectTemplate.py IN_REL=B OUT_REL=C");
    assert_eq!(program.scheduled, vec!["B", "C"]);

    // Without deferral the same order comes out.
    let eager = ViffTranslator::new(&g, &CompilerConfig::default(), &Recorder)
        .generate()
        .unwrap();
    assert_eq!(eager.code, program.code);
}

#[test]
fn test_deferral_carries_across_scaling_and_filter() {
    let a = ints("A", 2);
    let mut g = OperatorGraph::new();
    let agg = g.add_node(sum_by_first(&a, "B"));
    let b = g.node(agg).op().output.clone();
    let scale = g.add_node(Operator::new(
        OperatorKind::Math {
            op: MathOp::Mul,
            left: Value::Column(b.columns()[1].clone()),
            right: Value::constant("2"),
        },
        vec![b.clone()],
        ints("M", 2),
    ));
    let m = g.node(scale).op().output.clone();
    let select = g.add_node(filter(&m, 0, "S"));
    g.add_edge(agg, scale);
    g.add_edge(scale, select);
    g.infer_roots();

    let cfg = CompilerConfig {
        defer_aggregations: true,
        ..CompilerConfig::default()
    };
    let program = ViffTranslator::new(&g, &cfg, &Recorder).generate().unwrap();
    let lines: Vec<&str> = program.code.lines().collect();
    assert_eq!(
        lines[2],
        "MathMPCTemplate.py IN_REL=A LAMBDA=lambda e1, e2: [e1, e2 * 2] OUT_REL=M_pre"
    );
    assert_eq!(lines[3], "SelectTemplate.py IN_REL=M_pre OUT_REL=S_pre");
    assert_eq!(
        lines[4],
        "AggMPCTemplate.py AGG_COL=1 AGG_OP=sum GROUP_BY_COL=0 IN_REL=S_pre OUT_REL=S"
    );
    assert_eq!(program.scheduled, vec!["M_pre", "S_pre", "S"]);
    assert_eq!(program.outputs, vec!["S"]);
}

#[test]
fn test_unsupported_aggregate_fails_at_the_aggregate_when_deferred() {
    let a = ints("A", 2);
    let mut g = OperatorGraph::new();
    let agg = g.add_node(Operator::new(
        OperatorKind::Aggregate {
            func: AggFunc::Min,
            group_by: vec![a.columns()[0].clone()],
            columns: vec![a.columns()[1].clone()],
        },
        vec![a.clone()],
        ints("B", 2),
    ));
    let b = g.node(agg).op().output.clone();
    let select = g.add_node(filter(&b, 0, "C"));
    g.add_edge(agg, select);
    g.infer_roots();

    let cfg = CompilerConfig {
        defer_aggregations: true,
        ..CompilerConfig::default()
    };
    let deferred = ViffTranslator::new(&g, &cfg, &Recorder)
        .generate()
        .unwrap_err();
    match &deferred {
        Error::UnsupportedOperator {
            backend, operator, ..
        } => {
            assert_eq!(*backend, "viff");
            assert_eq!(operator, "aggregate(A -> B)");
        }
        other => panic!("unexpected {other}"),
    }
    let eager = ViffTranslator::new(&g, &CompilerConfig::default(), &Recorder)
        .generate()
        .unwrap_err();
    assert_eq!(eager.to_string(), deferred.to_string());
}

#[test]
fn test_unsupported_operator_aborts_generation() {
    let a = ints("A", 2);
    let mut g = OperatorGraph::new();
    g.add_node(Operator::new(
        OperatorKind::Project {
            columns: vec![a.columns()[0].clone()],
        },
        vec![a.clone()],
        ints("P", 1),
    ));
    g.infer_roots();
    let err = ViffTranslator::new(&g, &CompilerConfig::default(), &Recorder)
        .generate()
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperator { backend: "viff", .. }));
}
