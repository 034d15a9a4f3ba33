//! Row-wise arithmetic as a Python lambda.
//!
//! The lambda takes one parameter per column of the input relation and
//! returns the full row: the target column holds the expression, every other
//! column passes through unchanged.
//!
//! ```text
//! (a, b, c) with a * 5   =>  lambda e1, e2, e3: [e1 * 5, e2, e3]
//! (a, b)    with a / b   =>  lambda e1, e2: [divide(e1, e2), e2]
//! (a)       with a - 1   =>  lambda e: [e - 1]
//! ```

use tracing::debug;

use mpcflow_core::error::{Error, Result};
use mpcflow_core::operator::MathOp;
use mpcflow_core::relation::{Relation, Value};

pub fn generate_lambda(op: MathOp, rel: &Relation, left: &Value, right: &Value) -> Result<String> {
    if left.is_constant() && right.is_constant() {
        return Err(Error::MultipleConstants {
            relation: rel.name().to_string(),
        });
    }

    let single = rel.arity() == 1;
    let param = |index: usize| {
        if single {
            "e".to_string()
        } else {
            format!("e{}", index + 1)
        }
    };
    let operand = |value: &Value| -> Result<(String, Option<usize>)> {
        match value {
            Value::Constant(text) => Ok((text.clone(), None)),
            Value::Column(col) => {
                if col.relation() != rel.name() || col.index() >= rel.arity() {
                    return Err(Error::Schema(format!(
                        "operand {col} is not a column of {}",
                        rel.name()
                    )));
                }
                Ok((param(col.index()), Some(col.index())))
            }
        }
    };

    let (lhs, left_index) = operand(left)?;
    let (rhs, right_index) = operand(right)?;
    // The result lands in the left column, or the right one when the left
    // operand is a literal.
    let target = left_index.or(right_index);

    let expr = match op {
        MathOp::Div => format!("divide({lhs}, {rhs})"),
        _ => format!("{lhs} {} {rhs}", op.symbol()),
    };

    let params: Vec<String> = (0..rel.arity()).map(&param).collect();
    let body: Vec<String> = (0..rel.arity())
        .map(|i| {
            if Some(i) == target {
                expr.clone()
            } else {
                param(i)
            }
        })
        .collect();

    let lambda = format!("lambda {}: [{}]", params.join(", "), body.join(", "));
    debug!(relation = rel.name(), %lambda, "generated lambda");
    Ok(lambda)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpcflow_core::schema::ColumnType;

    fn rel(arity: usize) -> Relation {
        Relation::new("r", &vec![ColumnType::Int; arity])
    }

    fn col(r: &Relation, i: usize) -> Value {
        Value::Column(r.columns()[i].clone())
    }

    #[test]
    fn product_with_constant_keeps_other_columns() {
        let r = rel(3);
        let out = generate_lambda(MathOp::Mul, &r, &col(&r, 0), &Value::constant("5")).unwrap();
        assert_eq!(out, "lambda e1, e2, e3: [e1 * 5, e2, e3]");
    }

    #[test]
    fn division_uses_call_form() {
        let r = rel(2);
        let out = generate_lambda(MathOp::Div, &r, &col(&r, 0), &col(&r, 1)).unwrap();
        assert_eq!(out, "lambda e1, e2: [divide(e1, e2), e2]");
    }

    #[test]
    fn single_column_uses_bare_parameter() {
        let r = rel(1);
        let out = generate_lambda(MathOp::Sub, &r, &col(&r, 0), &Value::constant("1")).unwrap();
        assert_eq!(out, "lambda e: [e - 1]");
    }

    #[test]
    fn literal_on_the_left_keeps_operand_order() {
        let r = rel(3);
        let out = generate_lambda(MathOp::Sub, &r, &Value::constant("10"), &col(&r, 1)).unwrap();
        assert_eq!(out, "lambda e1, e2, e3: [e1, 10 - e2, e3]");
        let out = generate_lambda(MathOp::Div, &r, &Value::constant("10"), &col(&r, 2)).unwrap();
        assert_eq!(out, "lambda e1, e2, e3: [e1, e2, divide(10, e3)]");
    }

    #[test]
    fn two_literals_are_rejected() {
        let r = rel(2);
        let err =
            generate_lambda(MathOp::Mul, &r, &Value::constant("2"), &Value::constant("3")).unwrap_err();
        assert!(matches!(err, Error::MultipleConstants { ref relation } if relation == "r"));
    }

    #[test]
    fn foreign_column_is_a_schema_error() {
        let r = rel(2);
        let other = Relation::new("s", &[ColumnType::Int]);
        let err = generate_lambda(MathOp::Add, &r, &col(&other, 0), &Value::constant("1")).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
