//! The query planner.
//!
//! This module is responsible for converting the AST from the parser into a logical plan.
//! The logical plan joins tables in `FROM` order; the optimizer reorders it.
use std::collections::HashMap;
use std::fmt;

use crate::catalog::Catalog;
use crate::errors::ExecutionError;
use crate::parser::{Expression, SelectList, SelectStatement};
use crate::types::{Attribute, Schema};

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    Scan {
        table: String,
        alias: String,
        schema: Schema,
    },
    Select {
        input: Box<LogicalPlan>,
        predicate: Expression,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        condition: Option<Expression>,
    },
    Project {
        input: Box<LogicalPlan>,
        schema: Schema,
    },
    /// Orders by `order_by`, then by every remaining column.
    Sort {
        input: Box<LogicalPlan>,
        order_by: Vec<Attribute>,
    },
    /// Drops adjacent duplicates; its input is sorted.
    Distinct {
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    pub fn schema(&self) -> Schema {
        match self {
            LogicalPlan::Scan { schema, .. } | LogicalPlan::Project { schema, .. } => schema.clone(),
            LogicalPlan::Select { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Distinct { input } => input.schema(),
            LogicalPlan::Join { left, right, .. } => left.schema().concat(&right.schema()),
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{}", "-".repeat(depth))?;
        match self {
            LogicalPlan::Scan { table, alias, .. } if table == alias => writeln!(f, "Scan[{table}]")?,
            LogicalPlan::Scan { table, alias, .. } => writeln!(f, "Scan[{table} AS {alias}]")?,
            LogicalPlan::Select { predicate, .. } => writeln!(f, "Select[{predicate}]")?,
            LogicalPlan::Join { condition, .. } => match condition {
                Some(condition) => writeln!(f, "Join[{condition}]")?,
                None => writeln!(f, "Join[]")?,
            },
            LogicalPlan::Project { schema, .. } => writeln!(f, "Project[{schema}]")?,
            LogicalPlan::Sort { order_by, .. } => {
                let keys: Vec<String> = order_by.iter().map(|a| a.to_string()).collect();
                writeln!(f, "Sort[{}]", keys.join(", "))?
            }
            LogicalPlan::Distinct { .. } => writeln!(f, "Distinct")?,
        }
        match self {
            LogicalPlan::Scan { .. } => Ok(()),
            LogicalPlan::Select { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Distinct { input } => input.fmt_tree(f, depth + 1),
            LogicalPlan::Join { left, right, .. } => {
                left.fmt_tree(f, depth + 1)?;
                right.fmt_tree(f, depth + 1)
            }
        }
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

/// Builds the logical plan of `stmt`, resolving every name against `catalog`.
pub fn create_logical_plan(stmt: &SelectStatement, catalog: &Catalog) -> Result<LogicalPlan, ExecutionError> {
    let mut scans: Vec<LogicalPlan> = Vec::with_capacity(stmt.from.len());
    let mut aliases: HashMap<String, Schema> = HashMap::new();
    for reference in &stmt.from {
        let table = catalog.table(&reference.name)?;
        let alias = reference.alias().to_string();
        let schema = Schema::for_table(&alias, &table.columns);
        if aliases.insert(alias.clone(), schema.clone()).is_some() {
            return Err(ExecutionError::PlanningError(format!(
                "table alias {alias} is used twice"
            )));
        }
        scans.push(LogicalPlan::Scan {
            table: table.name.clone(),
            alias,
            schema,
        });
    }

    let resolve = |attribute: &Attribute| -> Result<(), ExecutionError> {
        let schema = aliases
            .get(&attribute.table)
            .ok_or_else(|| ExecutionError::TableNotFound(attribute.table.clone()))?;
        schema.index_of(attribute).map(|_| ())
    };
    if let Some(predicate) = &stmt.where_clause {
        for attribute in predicate.attributes() {
            resolve(attribute)?;
        }
    }
    if let SelectList::Columns(columns) = &stmt.select_list {
        columns.iter().try_for_each(&resolve)?;
    }
    stmt.order_by.iter().try_for_each(&resolve)?;

    let mut plan = join_in_from_order(scans, stmt.where_clause.as_ref())?;

    let projection = match &stmt.select_list {
        SelectList::Wildcard => None,
        SelectList::Columns(columns) => Some(Schema::new(columns.clone())),
    };
    let ordered_outside = match &projection {
        Some(schema) => stmt.order_by.iter().all(|a| schema.contains(a)),
        None => true,
    };
    if stmt.distinct && !ordered_outside {
        return Err(ExecutionError::PlanningError(
            "ORDER BY columns of a DISTINCT query must be selected".to_string(),
        ));
    }

    if !stmt.order_by.is_empty() && !ordered_outside {
        plan = LogicalPlan::Sort {
            input: Box::new(plan),
            order_by: stmt.order_by.clone(),
        };
    }
    if let Some(schema) = projection {
        plan = LogicalPlan::Project {
            input: Box::new(plan),
            schema,
        };
    }
    if ordered_outside && (!stmt.order_by.is_empty() || stmt.distinct) {
        plan = LogicalPlan::Sort {
            input: Box::new(plan),
            order_by: stmt.order_by.clone(),
        };
    }
    if stmt.distinct {
        plan = LogicalPlan::Distinct {
            input: Box::new(plan),
        };
    }
    Ok(plan)
}

/// Left-deep join of the scans in `FROM` order. Each conjunct is placed at the
/// lowest node that sees all tables it mentions.
fn join_in_from_order(
    scans: Vec<LogicalPlan>,
    predicate: Option<&Expression>,
) -> Result<LogicalPlan, ExecutionError> {
    let conjuncts: Vec<&Expression> = predicate.map(|p| p.conjuncts()).unwrap_or_default();
    let aliases: Vec<String> = scans
        .iter()
        .map(|scan| match scan {
            LogicalPlan::Scan { alias, .. } => alias.clone(),
            _ => String::new(),
        })
        .collect();

    // Position of the scan after which every table of a conjunct is available.
    let placement = |conjunct: &&&Expression| -> usize {
        conjunct
            .tables()
            .iter()
            .filter_map(|t| aliases.iter().position(|a| a == t))
            .max()
            .unwrap_or(0)
    };
    let single_table = |conjunct: &&&Expression| conjunct.tables().len() <= 1;

    let mut plan: Option<LogicalPlan> = None;
    for (position, scan) in scans.into_iter().enumerate() {
        let local = Expression::conjunction(
            conjuncts
                .iter()
                .filter(|c| single_table(c) && placement(c) == position)
                .map(|c| (**c).clone()),
        );
        let input = match local {
            Some(predicate) => LogicalPlan::Select {
                input: Box::new(scan),
                predicate,
            },
            None => scan,
        };
        plan = Some(match plan {
            None => input,
            Some(left) => LogicalPlan::Join {
                left: Box::new(left),
                right: Box::new(input),
                condition: Expression::conjunction(
                    conjuncts
                        .iter()
                        .filter(|c| !single_table(c) && placement(c) == position)
                        .map(|c| (**c).clone()),
                ),
            },
        });
    }
    plan.ok_or_else(|| ExecutionError::PlanningError("query names no tables".to_string()))
}
