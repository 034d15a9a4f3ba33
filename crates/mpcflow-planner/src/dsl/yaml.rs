//! YAML → OperatorGraph.
//!
//! Example:
//! ```yaml
//! config:
//!   class_name: sales_report
//!   defer_aggregations: true
//! relations:
//!   - { name: sales, owners: [1], columns: [int, int, int] }
//! inputs: [sales]
//! operators:
//!   - op: select
//!     inputs: [sales]
//!     output: big_sales
//!     condition: { op: ">", left: { col: 2 }, right: { lit: "100" } }
//!   - op: aggregate
//!     inputs: [big_sales]
//!     output: totals
//!     group_by: [0]
//!     columns: [2]
//!     func: sum
//! ```
//!
//! Column references are indices into the operator's input (for joins,
//! `left_key` indexes the first input and `right_key` the second). An
//! operator depends on an earlier operator whose output it reads. A `while`
//! operator lists in `body` the outputs of the operators entered at the start
//! of every iteration; those get loop edges instead of ordinary ones.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use mpcflow_core::config::{with_trailing_slash, Backend, CompilerConfig};
use mpcflow_core::error::Error as CoreError;
use mpcflow_core::expr::{CmpOp, Condition};
use mpcflow_core::graph::OperatorGraph;
use mpcflow_core::id::{NodeId, PartyId};
use mpcflow_core::operator::{AggFunc, IoPaths, MathOp, Operator, OperatorKind};
use mpcflow_core::relation::{Relation, RelationRef, Value};
use mpcflow_core::schema::{Column, ColumnType};

use super::DslError;

type Result<T> = std::result::Result<T, DslError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub config: Option<GraphFileConfig>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub operators: Vec<OperatorDef>,
}

/// Per-graph overrides of `CompilerConfig`; unset fields keep the base value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphFileConfig {
    pub backend: Option<Backend>,
    pub class_name: Option<String>,
    pub templates_dir: Option<String>,
    pub data_owner_id: Option<PartyId>,
    pub viff_config_loc: Option<String>,
    pub input_dir: Option<String>,
    pub output_dir: Option<String>,
    pub code_dir: Option<String>,
    pub strict: Option<bool>,
    pub defer_aggregations: Option<bool>,
    pub default_iterations: Option<u32>,
}

impl GraphFileConfig {
    pub fn apply(&self, cfg: &mut CompilerConfig) {
        if let Some(b) = self.backend {
            cfg.backend = b;
        }
        if let Some(ref s) = self.class_name {
            cfg.class_name = s.clone();
        }
        if let Some(ref s) = self.templates_dir {
            cfg.templates_dir = Some(s.clone());
        }
        if let Some(id) = self.data_owner_id {
            cfg.data_owner_id = id;
        }
        if let Some(ref s) = self.viff_config_loc {
            cfg.viff_config_loc = s.clone();
        }
        if let Some(ref s) = self.input_dir {
            cfg.paths.input_dir = with_trailing_slash(s.clone());
        }
        if let Some(ref s) = self.output_dir {
            cfg.paths.output_dir = with_trailing_slash(s.clone());
        }
        if let Some(ref s) = self.code_dir {
            cfg.paths.code_dir = with_trailing_slash(s.clone());
        }
        if let Some(v) = self.strict {
            cfg.strict = v;
        }
        if let Some(v) = self.defer_aggregations {
            cfg.defer_aggregations = v;
        }
        if let Some(n) = self.default_iterations {
            cfg.default_iterations = n;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    #[serde(default)]
    pub owners: Vec<PartyId>,
    pub columns: Vec<ColumnType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueDef {
    Column { col: usize },
    Literal { lit: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionDef {
    Compare {
        op: CmpOp,
        left: ValueDef,
        right: ValueDef,
    },
    And {
        and: Vec<ConditionDef>,
    },
    Or {
        or: Vec<ConditionDef>,
    },
    Not {
        not: Box<ConditionDef>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MathDef {
    pub inputs: Vec<String>,
    pub output: String,
    pub left: ValueDef,
    pub right: ValueDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum OperatorDef {
    Select {
        inputs: Vec<String>,
        output: String,
        #[serde(default)]
        columns: Vec<usize>,
        #[serde(default)]
        condition: Option<ConditionDef>,
    },
    Project {
        inputs: Vec<String>,
        output: String,
        columns: Vec<usize>,
    },
    Aggregate {
        inputs: Vec<String>,
        output: String,
        #[serde(default)]
        group_by: Vec<usize>,
        columns: Vec<usize>,
        func: AggFunc,
    },
    Join {
        inputs: Vec<String>,
        output: String,
        left_key: usize,
        right_key: usize,
    },
    Add(MathDef),
    Sub(MathDef),
    Mul(MathDef),
    Div(MathDef),
    Union {
        inputs: Vec<String>,
        output: String,
    },
    While {
        inputs: Vec<String>,
        output: String,
        #[serde(default)]
        condition: Option<ConditionDef>,
        #[serde(default)]
        iterations: Option<u32>,
        #[serde(default)]
        body: Vec<String>,
    },
}

impl OperatorDef {
    pub fn inputs(&self) -> &[String] {
        match self {
            OperatorDef::Select { inputs, .. }
            | OperatorDef::Project { inputs, .. }
            | OperatorDef::Aggregate { inputs, .. }
            | OperatorDef::Join { inputs, .. }
            | OperatorDef::Union { inputs, .. }
            | OperatorDef::While { inputs, .. } => inputs,
            OperatorDef::Add(m) | OperatorDef::Sub(m) | OperatorDef::Mul(m) | OperatorDef::Div(m) => {
                &m.inputs
            }
        }
    }

    pub fn output(&self) -> &str {
        match self {
            OperatorDef::Select { output, .. }
            | OperatorDef::Project { output, .. }
            | OperatorDef::Aggregate { output, .. }
            | OperatorDef::Join { output, .. }
            | OperatorDef::Union { output, .. }
            | OperatorDef::While { output, .. } => output,
            OperatorDef::Add(m) | OperatorDef::Sub(m) | OperatorDef::Mul(m) | OperatorDef::Div(m) => {
                &m.output
            }
        }
    }
}

/// Parse a YAML graph document without building it.
pub fn parse_yaml_graph(yaml_src: &str) -> Result<GraphDocument> {
    let doc: GraphDocument = serde_yaml::from_str(yaml_src)?;
    if doc.operators.is_empty() {
        return Err(DslError::Invalid("graph has no operators".into()));
    }
    Ok(doc)
}

/// Parse, apply the document's config section over `base`, and build the
/// graph with the resulting paths.
pub fn load_yaml_graph(
    yaml_src: &str,
    mut base: CompilerConfig,
) -> Result<(OperatorGraph, CompilerConfig)> {
    let doc = parse_yaml_graph(yaml_src)?;
    if let Some(ref file_cfg) = doc.config {
        file_cfg.apply(&mut base);
    }
    let graph = doc.build(&base.paths)?;
    Ok((graph, base))
}

impl GraphDocument {
    pub fn build(&self, paths: &IoPaths) -> Result<OperatorGraph> {
        let mut rels: BTreeMap<String, RelationRef> = BTreeMap::new();
        for def in &self.relations {
            let rel = Relation::new(def.name.as_str(), &def.columns)
                .with_owners(def.owners.iter().copied())
                .into_ref();
            if rels.insert(def.name.clone(), rel).is_some() {
                return Err(DslError::Invalid(format!(
                    "relation {} declared twice",
                    def.name
                )));
            }
        }

        let mut graph = OperatorGraph::new();
        let mut producers: HashMap<String, (usize, NodeId)> = HashMap::new();
        let mut ids = Vec::with_capacity(self.operators.len());

        for (pos, def) in self.operators.iter().enumerate() {
            let inputs = def
                .inputs()
                .iter()
                .map(|name| {
                    rels.get(name).cloned().ok_or_else(|| {
                        DslError::Invalid(format!(
                            "operator {} reads unknown relation {name}",
                            def.output()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let (kind, types) = lower(def, &inputs)?;

            let name = def.output();
            if producers.contains_key(name) {
                return Err(CoreError::DuplicateOutput(name.to_string()).into());
            }
            let output = match rels.get(name) {
                Some(declared) => {
                    if declared.arity() != types.len() {
                        return Err(DslError::Invalid(format!(
                            "{} declares {} columns but {} writes {}",
                            name,
                            declared.arity(),
                            kind.name(),
                            types.len()
                        )));
                    }
                    declared.clone()
                }
                None => {
                    let owners: BTreeSet<PartyId> = inputs
                        .iter()
                        .flat_map(|r| r.owners().iter().copied())
                        .collect();
                    let rel = Relation::new(name, &types).with_owners(owners).into_ref();
                    rels.insert(name.to_string(), rel.clone());
                    rel
                }
            };

            let id = graph.add_node(Operator::new(kind, inputs, output).with_paths(paths.clone()));
            producers.insert(name.to_string(), (pos, id));
            ids.push(id);
        }

        // Loop bodies.
        let mut loop_edges: Vec<(NodeId, NodeId)> = Vec::new();
        for (pos, def) in self.operators.iter().enumerate() {
            let OperatorDef::While { body, .. } = def else {
                continue;
            };
            for entry in body {
                let (_, child) = producers.get(entry.as_str()).ok_or_else(|| {
                    DslError::Invalid(format!(
                        "loop {} enters unknown operator {entry}",
                        def.output()
                    ))
                })?;
                if *child == ids[pos] {
                    return Err(DslError::Invalid(format!(
                        "loop {entry} cannot enter itself"
                    )));
                }
                loop_edges.push((ids[pos], *child));
            }
        }

        for (pos, def) in self.operators.iter().enumerate() {
            for input in def.inputs() {
                let Some((producer_pos, producer)) = producers.get(input.as_str()) else {
                    continue;
                };
                let is_loop_entry = loop_edges.contains(&(*producer, ids[pos]));
                if *producer_pos < pos && !is_loop_entry {
                    graph.add_edge(*producer, ids[pos]);
                }
            }
        }
        for (parent, child) in loop_edges {
            graph.add_loop_edge(parent, child);
        }

        for name in &self.inputs {
            if !rels.contains_key(name) {
                return Err(DslError::Invalid(format!(
                    "declared input {name} has no schema"
                )));
            }
            graph.declare_input(name.as_str());
        }

        graph.infer_roots();
        graph.validate()?;
        Ok(graph)
    }
}

fn column(rel: &Relation, index: usize) -> Result<Column> {
    rel.column(index).cloned().ok_or_else(|| {
        DslError::Invalid(format!(
            "column {index} out of range for {} ({} columns)",
            rel.name(),
            rel.arity()
        ))
    })
}

fn columns(rel: &Relation, indices: &[usize]) -> Result<Vec<Column>> {
    indices.iter().map(|i| column(rel, *i)).collect()
}

fn arity_check(def: &OperatorDef, inputs: &[RelationRef], ok: bool, expected: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(DslError::Invalid(format!(
            "{} reads {} relations, expected {expected}",
            def.output(),
            inputs.len()
        )))
    }
}

impl ValueDef {
    fn lower(&self, rel: &Relation) -> Result<Value> {
        match self {
            ValueDef::Column { col } => column(rel, *col).map(Value::Column),
            ValueDef::Literal { lit } => Ok(Value::Constant(lit.clone())),
        }
    }
}

impl ConditionDef {
    fn lower(&self, rel: &Relation) -> Result<Condition> {
        let fold = |parts: &[ConditionDef],
                    join: fn(Box<Condition>, Box<Condition>) -> Condition|
         -> Result<Condition> {
            let mut iter = parts.iter();
            let first = iter
                .next()
                .ok_or_else(|| DslError::Invalid("empty and/or condition".into()))?
                .lower(rel)?;
            iter.try_fold(first, |acc, c| -> Result<Condition> {
                Ok(join(Box::new(acc), Box::new(c.lower(rel)?)))
            })
        };
        match self {
            ConditionDef::Compare { op, left, right } => Ok(Condition::Compare {
                op: *op,
                left: left.lower(rel)?,
                right: right.lower(rel)?,
            }),
            ConditionDef::And { and } => fold(and, Condition::And),
            ConditionDef::Or { or } => fold(or, Condition::Or),
            ConditionDef::Not { not } => Ok(Condition::Not(Box::new(not.lower(rel)?))),
        }
    }
}

fn lower_math(def: &OperatorDef, op: MathOp, m: &MathDef, inputs: &[RelationRef]) -> Result<(OperatorKind, Vec<ColumnType>)> {
    arity_check(def, inputs, inputs.len() == 1, "1")?;
    let rel = &inputs[0];
    Ok((
        OperatorKind::Math {
            op,
            left: m.left.lower(rel)?,
            right: m.right.lower(rel)?,
        },
        rel.column_types(),
    ))
}

/// Operator kind plus the derived output column types.
fn lower(def: &OperatorDef, inputs: &[RelationRef]) -> Result<(OperatorKind, Vec<ColumnType>)> {
    match def {
        OperatorDef::Select {
            columns: idx,
            condition,
            ..
        } => {
            arity_check(def, inputs, inputs.len() == 1, "1")?;
            let rel = &inputs[0];
            let cols = columns(rel, idx)?;
            let condition = condition.as_ref().map(|c| c.lower(rel)).transpose()?;
            let types = if cols.is_empty() {
                rel.column_types()
            } else {
                cols.iter().map(Column::ty).collect()
            };
            Ok((OperatorKind::Select { columns: cols, condition }, types))
        }
        OperatorDef::Project { columns: idx, .. } => {
            arity_check(def, inputs, inputs.len() == 1, "1")?;
            let cols = columns(&inputs[0], idx)?;
            let types = cols.iter().map(Column::ty).collect();
            Ok((OperatorKind::Project { columns: cols }, types))
        }
        OperatorDef::Aggregate {
            group_by,
            columns: idx,
            func,
            ..
        } => {
            arity_check(def, inputs, inputs.len() == 1, "1")?;
            let rel = &inputs[0];
            let keys = columns(rel, group_by)?;
            let cols = columns(rel, idx)?;
            if cols.is_empty() {
                return Err(DslError::Invalid(format!(
                    "{} aggregates no columns",
                    def.output()
                )));
            }
            let mut types: Vec<ColumnType> = keys.iter().map(Column::ty).collect();
            types.extend(cols.iter().map(|c| match func {
                AggFunc::Count => ColumnType::Int,
                _ => c.ty(),
            }));
            Ok((
                OperatorKind::Aggregate {
                    func: *func,
                    group_by: keys,
                    columns: cols,
                },
                types,
            ))
        }
        OperatorDef::Join {
            left_key,
            right_key,
            ..
        } => {
            arity_check(def, inputs, inputs.len() == 2, "2")?;
            let (left, right) = (&inputs[0], &inputs[1]);
            let left_key = column(left, *left_key)?;
            let right_key = column(right, *right_key)?;
            let mut types = left.column_types();
            types.extend(
                right
                    .columns()
                    .iter()
                    .filter(|c| c.index() != right_key.index())
                    .map(Column::ty),
            );
            Ok((
                OperatorKind::Join {
                    left_key,
                    right_key,
                },
                types,
            ))
        }
        OperatorDef::Add(m) => lower_math(def, MathOp::Add, m, inputs),
        OperatorDef::Sub(m) => lower_math(def, MathOp::Sub, m, inputs),
        OperatorDef::Mul(m) => lower_math(def, MathOp::Mul, m, inputs),
        OperatorDef::Div(m) => lower_math(def, MathOp::Div, m, inputs),
        OperatorDef::Union { .. } => {
            arity_check(def, inputs, inputs.len() >= 2, "at least 2")?;
            let types = inputs[0].column_types();
            if inputs.iter().any(|r| r.column_types() != types) {
                return Err(DslError::Invalid(format!(
                    "{} unions relations with different schemas",
                    def.output()
                )));
            }
            Ok((OperatorKind::Union, types))
        }
        OperatorDef::While {
            condition,
            iterations,
            ..
        } => {
            arity_check(def, inputs, !inputs.is_empty(), "at least 1")?;
            let rel = &inputs[0];
            let condition = condition.as_ref().map(|c| c.lower(rel)).transpose()?;
            Ok((
                OperatorKind::While {
                    condition,
                    iterations: *iterations,
                },
                rel.column_types(),
            ))
        }
    }
}
