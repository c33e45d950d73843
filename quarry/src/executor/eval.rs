//! Expression evaluation.
//!
//! One walk over the expression tree serves three purposes, picked by
//! [`EvalMode`]: testing a tuple, carving out the key range an index can
//! answer, and feeding a conjunctive `WHERE` clause into constraint
//! propagation.
use crate::errors::ExecutionError;
use crate::optimizer::constraints::ConstraintSet;
use crate::parser::{BinaryOperator, Expression};
use crate::types::{Attribute, Tuple};

pub enum EvalMode<'a> {
    /// Evaluate against the current tuple.
    Filter(&'a Tuple),
    /// Absorb comparisons between the indexed column and literals into a key
    /// range; everything else becomes residual.
    Indexability(&'a mut IndexRange),
    /// Absorb the clause into attribute classes and residual predicates.
    Propagation(&'a mut ConstraintSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluated {
    Bool(bool),
    Int(i32),
    /// Consumed by an analysis mode.
    Absorbed,
}

/// Inclusive key range for one index column, plus the conjuncts it cannot answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRange {
    pub column: Attribute,
    pub low: Option<i64>,
    pub high: Option<i64>,
    pub residual: Vec<Expression>,
}

impl IndexRange {
    pub fn new(column: Attribute) -> Self {
        Self {
            column,
            low: None,
            high: None,
            residual: Vec::new(),
        }
    }

    pub fn tighten(&mut self, low: Option<i64>, high: Option<i64>) {
        if let Some(value) = low {
            self.low = Some(self.low.map_or(value, |current| current.max(value)));
        }
        if let Some(value) = high {
            self.high = Some(self.high.map_or(value, |current| current.min(value)));
        }
    }

    /// True when at least one bound came from the predicate.
    pub fn is_bounded(&self) -> bool {
        self.low.is_some() || self.high.is_some()
    }

    /// The range as `i32` keys, or `None` when no `i32` can fall inside it.
    pub fn key_bounds(&self) -> Option<(Option<i32>, Option<i32>)> {
        let low = self.low.unwrap_or(i64::from(i32::MIN));
        let high = self.high.unwrap_or(i64::from(i32::MAX));
        if low > high || low > i64::from(i32::MAX) || high < i64::from(i32::MIN) {
            return None;
        }
        let clamp = |v: i64| v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        Some((self.low.map(clamp), self.high.map(clamp)))
    }

    pub fn residual_predicate(&self) -> Option<Expression> {
        Expression::conjunction(self.residual.iter().cloned())
    }
}

/// Inclusive bounds implied by `column op value`; `None` for `<>`.
pub(crate) fn literal_bounds(op: BinaryOperator, value: i32) -> Option<(Option<i64>, Option<i64>)> {
    let value = i64::from(value);
    match op {
        BinaryOperator::Eq => Some((Some(value), Some(value))),
        BinaryOperator::Lt => Some((None, Some(value - 1))),
        BinaryOperator::LtEq => Some((None, Some(value))),
        BinaryOperator::Gt => Some((Some(value + 1), None)),
        BinaryOperator::GtEq => Some((Some(value), None)),
        BinaryOperator::NotEq | BinaryOperator::And | BinaryOperator::Or => None,
    }
}

/// Normalizes a column/literal comparison so the column is on the left.
fn column_literal<'e>(
    left: &'e Expression,
    op: BinaryOperator,
    right: &'e Expression,
) -> Option<(&'e Attribute, BinaryOperator, i32)> {
    match (left, right) {
        (Expression::Column(attribute), Expression::Literal(value)) => Some((attribute, op, *value)),
        (Expression::Literal(value), Expression::Column(attribute)) => {
            Some((attribute, op.flip(), *value))
        }
        _ => None,
    }
}

fn expect_int(expr: &Expression, value: Evaluated) -> Result<i32, ExecutionError> {
    match value {
        Evaluated::Int(v) => Ok(v),
        _ => Err(ExecutionError::UnsupportedExpression(format!(
            "`{expr}` is not an integer operand"
        ))),
    }
}

fn expect_bool(expr: &Expression, value: Evaluated) -> Result<bool, ExecutionError> {
    match value {
        Evaluated::Bool(v) => Ok(v),
        _ => Err(ExecutionError::UnsupportedExpression(format!(
            "`{expr}` is not a predicate"
        ))),
    }
}

pub fn evaluate(expr: &Expression, mode: &mut EvalMode<'_>) -> Result<Evaluated, ExecutionError> {
    if let Expression::Binary {
        op: BinaryOperator::Or,
        ..
    } = expr
    {
        return Err(ExecutionError::UnsupportedExpression(format!(
            "disjunction `{expr}`"
        )));
    }

    match mode {
        EvalMode::Filter(tuple) => match expr {
            Expression::Literal(value) => Ok(Evaluated::Int(*value)),
            Expression::Column(attribute) => tuple
                .get(attribute)
                .map(Evaluated::Int)
                .ok_or_else(|| ExecutionError::ColumnNotFound(attribute.to_string())),
            Expression::Binary {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                let left_value = evaluate(left, mode)?;
                if !expect_bool(left, left_value)? {
                    return Ok(Evaluated::Bool(false));
                }
                let right_value = evaluate(right, mode)?;
                Ok(Evaluated::Bool(expect_bool(right, right_value)?))
            }
            Expression::Binary { left, op, right } => {
                let left_value = evaluate(left, mode)?;
                let l = expect_int(left, left_value)?;
                let right_value = evaluate(right, mode)?;
                let r = expect_int(right, right_value)?;
                op.compare(l, r)
                    .map(Evaluated::Bool)
                    .ok_or_else(|| ExecutionError::UnsupportedExpression(expr.to_string()))
            }
        },

        EvalMode::Indexability(range) => {
            match expr {
                Expression::Binary {
                    left,
                    op: BinaryOperator::And,
                    right,
                } => {
                    evaluate(left, mode)?;
                    evaluate(right, mode)?;
                }
                Expression::Binary { left, op, right } => {
                    let bounds = column_literal(left, *op, right)
                        .filter(|(attribute, _, _)| **attribute == range.column)
                        .and_then(|(_, op, value)| literal_bounds(op, value));
                    match bounds {
                        Some((low, high)) => range.tighten(low, high),
                        None => range.residual.push(expr.clone()),
                    }
                }
                other => range.residual.push(other.clone()),
            }
            Ok(Evaluated::Absorbed)
        }

        EvalMode::Propagation(constraints) => {
            match expr {
                Expression::Binary {
                    left,
                    op: BinaryOperator::And,
                    right,
                } => {
                    evaluate(left, mode)?;
                    evaluate(right, mode)?;
                }
                Expression::Binary { left, op, right } => match (&**left, &**right) {
                    (Expression::Literal(l), Expression::Literal(r)) => {
                        if op.compare(*l, *r) != Some(true) {
                            return Err(ExecutionError::UnsatisfiablePredicate(expr.to_string()));
                        }
                    }
                    (Expression::Column(a), Expression::Column(b)) if *op == BinaryOperator::Eq => {
                        constraints.equate(a, b);
                    }
                    _ => match column_literal(left, *op, right) {
                        Some((attribute, op, value)) if op != BinaryOperator::NotEq => {
                            constraints.restrict(attribute, op, value);
                        }
                        _ => constraints.keep_residual(expr.clone())?,
                    },
                },
                other => {
                    return Err(ExecutionError::UnsupportedExpression(format!(
                        "`{other}` is not a predicate"
                    )))
                }
            }
            Ok(Evaluated::Absorbed)
        }
    }
}

/// Tests `tuple` against a predicate.
pub fn evaluate_predicate(expr: &Expression, tuple: &Tuple) -> Result<bool, ExecutionError> {
    let value = evaluate(expr, &mut EvalMode::Filter(tuple))?;
    expect_bool(expr, value)
}

/// The key range on `column` that `predicate` pins down.
pub fn index_range(predicate: &Expression, column: Attribute) -> Result<IndexRange, ExecutionError> {
    let mut range = IndexRange::new(column);
    evaluate(predicate, &mut EvalMode::Indexability(&mut range))?;
    Ok(range)
}
