//! Constraint propagation over a conjunctive `WHERE` clause.
//!
//! Equalities between columns merge attribute classes, comparisons with
//! literals narrow a class's range, and whatever is left (column inequalities,
//! `<>`) is filed under the table or table pair it mentions. Predicates are
//! then rebuilt per table and per join step.
use std::collections::BTreeMap;

use crate::errors::ExecutionError;
use crate::executor::eval::{evaluate, literal_bounds, EvalMode};
use crate::parser::{BinaryOperator, Expression};
use crate::types::Attribute;
use crate::union_find::{UnionFind, UnionFindElement};

#[derive(Debug, Default, Clone)]
pub struct ConstraintSet {
    classes: UnionFind,
    residual_by_table: BTreeMap<String, Vec<Expression>>,
    residual_by_pair: BTreeMap<(String, String), Vec<Expression>>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn compare(left: &Attribute, op: BinaryOperator, right: Expression) -> Expression {
    Expression::binary(Expression::Column(left.clone()), op, right)
}

/// The range of `class` restated as predicates on `attribute`.
fn bound_predicates(attribute: &Attribute, class: &UnionFindElement) -> Vec<Expression> {
    let (min, max) = (i64::from(i32::MIN), i64::from(i32::MAX));
    let low = class.lower.filter(|v| *v > min);
    let high = class.upper.filter(|v| *v < max);
    let unreachable =
        class.is_empty() || low.is_some_and(|v| v > max) || high.is_some_and(|v| v < min);
    if unreachable {
        let itself = Expression::Column(attribute.clone());
        return vec![compare(attribute, BinaryOperator::Lt, itself)];
    }
    // Both bounds lie inside the i32 range here.
    if let Some(value) = class.equality {
        return vec![compare(attribute, BinaryOperator::Eq, Expression::Literal(value as i32))];
    }
    let mut predicates = Vec::new();
    if let Some(value) = low {
        predicates.push(compare(attribute, BinaryOperator::GtEq, Expression::Literal(value as i32)));
    }
    if let Some(value) = high {
        predicates.push(compare(attribute, BinaryOperator::LtEq, Expression::Literal(value as i32)));
    }
    predicates
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propagates every conjunct of `predicate`. A conjunct comparing two
    /// literals that is false makes the whole clause unsatisfiable.
    pub fn from_predicate(predicate: Option<&Expression>) -> Result<Self, ExecutionError> {
        let mut constraints = Self::new();
        if let Some(predicate) = predicate {
            evaluate(predicate, &mut EvalMode::Propagation(&mut constraints))?;
        }
        Ok(constraints)
    }

    pub fn restrict(&mut self, attribute: &Attribute, op: BinaryOperator, value: i32) {
        if let Some((low, high)) = literal_bounds(op, value) {
            let class = self.classes.find(attribute);
            if let Some(low) = low {
                class.tighten_lower(low);
            }
            if let Some(high) = high {
                class.tighten_upper(high);
            }
        }
    }

    pub fn equate(&mut self, a: &Attribute, b: &Attribute) {
        self.classes.union(a, b);
    }

    pub fn keep_residual(&mut self, expr: Expression) -> Result<(), ExecutionError> {
        let tables: Vec<String> = expr.tables().into_iter().collect();
        match tables.as_slice() {
            [table] => self
                .residual_by_table
                .entry(table.clone())
                .or_default()
                .push(expr),
            [a, b] => self.residual_by_pair.entry(pair_key(a, b)).or_default().push(expr),
            _ => {
                return Err(ExecutionError::UnsupportedExpression(format!(
                    "`{expr}` must mention one or two tables"
                )))
            }
        }
        Ok(())
    }

    pub fn class_of(&self, attribute: &Attribute) -> Option<&UnionFindElement> {
        self.classes.get(attribute)
    }

    pub fn classes(&self) -> Vec<&UnionFindElement> {
        self.classes.elements()
    }

    /// Everything that can be checked on `alias` alone: range bounds of its
    /// attributes, equalities among them, and its own residual conjuncts.
    pub fn table_predicate(&self, alias: &str) -> Option<Expression> {
        let mut parts = Vec::new();
        for class in self.classes.elements() {
            let members: Vec<&Attribute> =
                class.attributes.iter().filter(|a| a.table == alias).collect();
            let Some(first) = members.first() else {
                continue;
            };
            for member in &members {
                parts.extend(bound_predicates(member, class));
            }
            for member in members.iter().skip(1) {
                parts.push(compare(first, BinaryOperator::Eq, Expression::Column((*member).clone())));
            }
        }
        if let Some(residual) = self.residual_by_table.get(alias) {
            parts.extend(residual.iter().cloned());
        }
        Expression::conjunction(parts)
    }

    /// The condition for joining `inner` onto the tables in `outer`: one
    /// equality per class linking both sides, plus residuals of each pair.
    pub fn join_predicate(&self, outer: &[String], inner: &str) -> Option<Expression> {
        let mut parts = Vec::new();
        for class in self.classes.elements() {
            let outer_member = class
                .attributes
                .iter()
                .find(|a| outer.iter().any(|t| *t == a.table));
            let inner_member = class.attributes.iter().find(|a| a.table == inner);
            if let (Some(o), Some(i)) = (outer_member, inner_member) {
                parts.push(compare(o, BinaryOperator::Eq, Expression::Column(i.clone())));
            }
        }
        for table in outer {
            if let Some(residual) = self.residual_by_pair.get(&pair_key(table, inner)) {
                parts.extend(residual.iter().cloned());
            }
        }
        Expression::conjunction(parts)
    }
}
