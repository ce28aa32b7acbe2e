//! The workflow expression language.
//!
//! A small JSON-defined DSL evaluated against the workflow's shared
//! context: field references (dotted paths), named parameters, literals,
//! arithmetic computations, and boolean expressions built from
//! comparisons. Workflow authors — including LLMs editing their own
//! workflows — write these as plain JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from expression evaluation.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    /// A field path did not resolve in the context.
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// A named parameter is missing.
    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    /// A computation divided by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A value was not numeric where a number was required.
    #[error("expected a number, got {0}")]
    NotANumber(String),

    /// A computation had no operands.
    #[error("empty operand list")]
    EmptyOperands,
}

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueExpr {
    /// A dotted path into the context (`"balances.scrip"`).
    Field {
        /// The path.
        field: String,
    },
    /// A named parameter from the workflow definition.
    Param {
        /// The parameter name.
        param: String,
    },
    /// A literal JSON value.
    Literal {
        /// The value.
        value: Value,
    },
    /// An arithmetic computation over operands.
    Compute {
        /// The operation.
        op: ComputeOp,
        /// The operands.
        operands: Vec<ValueExpr>,
    },
}

/// Arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeOp {
    /// Sum of operands.
    Add,
    /// First operand minus the rest.
    Sub,
    /// Product of operands.
    Mul,
    /// First operand divided by the rest.
    Div,
    /// Smallest operand.
    Min,
    /// Largest operand.
    Max,
}

/// A boolean expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    /// Compare two values.
    Compare {
        /// The comparison operator.
        op: CompareOp,
        /// Left operand.
        left: ValueExpr,
        /// Right operand.
        right: ValueExpr,
    },
    /// All sub-expressions hold.
    All {
        /// The conjuncts.
        exprs: Vec<Expression>,
    },
    /// At least one sub-expression holds.
    Any {
        /// The disjuncts.
        exprs: Vec<Expression>,
    },
    /// Negation.
    Not {
        /// The negated expression.
        expr: Box<Expression>,
    },
    /// A literal truth value.
    Literal {
        /// The value.
        value: bool,
    },
}

/// Comparison operators. Equality works on any JSON value; ordering
/// requires numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

/// Resolve a dotted path against a JSON object.
fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Evaluate a value expression.
pub fn eval_value(
    expr: &ValueExpr,
    context: &Value,
    params: &HashMap<String, Value>,
) -> Result<Value, EvalError> {
    match expr {
        ValueExpr::Field { field } => lookup(context, field)
            .cloned()
            .ok_or_else(|| EvalError::FieldNotFound(field.clone())),
        ValueExpr::Param { param } => params
            .get(param)
            .cloned()
            .ok_or_else(|| EvalError::ParameterNotFound(param.clone())),
        ValueExpr::Literal { value } => Ok(value.clone()),
        ValueExpr::Compute { op, operands } => {
            let mut numbers = Vec::with_capacity(operands.len());
            for operand in operands {
                numbers.push(as_number(&eval_value(operand, context, params)?)?);
            }
            compute(*op, &numbers).map(|n| {
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            })
        }
    }
}

/// Evaluate a boolean expression.
pub fn eval_bool(
    expr: &Expression,
    context: &Value,
    params: &HashMap<String, Value>,
) -> Result<bool, EvalError> {
    match expr {
        Expression::Literal { value } => Ok(*value),
        Expression::Not { expr } => Ok(!eval_bool(expr, context, params)?),
        Expression::All { exprs } => {
            for e in exprs {
                if !eval_bool(e, context, params)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expression::Any { exprs } => {
            for e in exprs {
                if eval_bool(e, context, params)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expression::Compare { op, left, right } => {
            let lhs = eval_value(left, context, params)?;
            let rhs = eval_value(right, context, params)?;
            match op {
                CompareOp::Eq => Ok(lhs == rhs),
                CompareOp::Ne => Ok(lhs != rhs),
                ordered => {
                    let l = as_number(&lhs)?;
                    let r = as_number(&rhs)?;
                    Ok(match ordered {
                        CompareOp::Lt => l < r,
                        CompareOp::Le => l <= r,
                        CompareOp::Gt => l > r,
                        CompareOp::Ge => l >= r,
                        CompareOp::Eq | CompareOp::Ne => unreachable!(),
                    })
                }
            }
        }
    }
}

fn as_number(value: &Value) -> Result<f64, EvalError> {
    value
        .as_f64()
        .ok_or_else(|| EvalError::NotANumber(value.to_string()))
}

fn compute(op: ComputeOp, numbers: &[f64]) -> Result<f64, EvalError> {
    let (&first, rest) = numbers.split_first().ok_or(EvalError::EmptyOperands)?;
    match op {
        ComputeOp::Add => Ok(numbers.iter().sum()),
        ComputeOp::Mul => Ok(numbers.iter().product()),
        ComputeOp::Sub => Ok(rest.iter().fold(first, |acc, n| acc - n)),
        ComputeOp::Div => {
            let mut acc = first;
            for &n in rest {
                if n == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                acc /= n;
            }
            Ok(acc)
        }
        ComputeOp::Min => Ok(numbers.iter().copied().fold(first, f64::min)),
        ComputeOp::Max => Ok(numbers.iter().copied().fold(first, f64::max)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "balances": {"scrip": 60, "llm_dollar_budget": 0.5},
            "state": "trading",
        })
    }

    #[test]
    fn fields_resolve_dotted_paths() {
        let value = eval_value(
            &ValueExpr::Field {
                field: "balances.scrip".into(),
            },
            &ctx(),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(value, json!(60));

        let err = eval_value(
            &ValueExpr::Field {
                field: "balances.missing".into(),
            },
            &ctx(),
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, EvalError::FieldNotFound("balances.missing".into()));
    }

    #[test]
    fn computations_fold_operands() {
        let params = HashMap::from([("reserve".to_string(), json!(10))]);
        let expr = ValueExpr::Compute {
            op: ComputeOp::Sub,
            operands: vec![
                ValueExpr::Field {
                    field: "balances.scrip".into(),
                },
                ValueExpr::Param {
                    param: "reserve".into(),
                },
            ],
        };
        assert_eq!(eval_value(&expr, &ctx(), &params).unwrap(), json!(50.0));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let expr = ValueExpr::Compute {
            op: ComputeOp::Div,
            operands: vec![
                ValueExpr::Literal { value: json!(1) },
                ValueExpr::Literal { value: json!(0) },
            ],
        };
        assert_eq!(
            eval_value(&expr, &ctx(), &HashMap::new()).unwrap_err(),
            EvalError::DivisionByZero
        );
    }

    #[test]
    fn comparisons_and_connectives() {
        let params = HashMap::new();
        let rich = Expression::Compare {
            op: CompareOp::Ge,
            left: ValueExpr::Field {
                field: "balances.scrip".into(),
            },
            right: ValueExpr::Literal { value: json!(50) },
        };
        let trading = Expression::Compare {
            op: CompareOp::Eq,
            left: ValueExpr::Field {
                field: "state".into(),
            },
            right: ValueExpr::Literal {
                value: json!("trading"),
            },
        };
        assert!(eval_bool(&rich, &ctx(), &params).unwrap());
        assert!(eval_bool(&trading, &ctx(), &params).unwrap());
        let both = Expression::All {
            exprs: vec![rich.clone(), trading],
        };
        assert!(eval_bool(&both, &ctx(), &params).unwrap());
        let negated = Expression::Not {
            expr: Box::new(rich),
        };
        assert!(!eval_bool(&negated, &ctx(), &params).unwrap());
    }

    #[test]
    fn expressions_round_trip_as_json() {
        let expr: Expression = serde_json::from_value(json!({
            "kind": "compare",
            "op": "gt",
            "left": {"kind": "field", "field": "balances.scrip"},
            "right": {"kind": "param", "param": "threshold"},
        }))
        .unwrap();
        let params = HashMap::from([("threshold".to_string(), json!(10))]);
        assert!(eval_bool(&expr, &ctx(), &params).unwrap());
    }
}
