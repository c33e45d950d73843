//! The query optimizer.
//!
//! Optimization happens in two steps. [`rewrite`] propagates the `WHERE`
//! clause through attribute classes, pushes the resulting predicates down to
//! each table and reorders the joins by estimated cost. [`lower`] then picks
//! an access path for every table and an algorithm for every join.
use std::fmt;

use crate::catalog::{Catalog, IndexInfo};
use crate::config::{JoinAlgorithm, SortAlgorithm};
use crate::errors::ExecutionError;
use crate::parser::Expression;
use crate::planner::LogicalPlan;
use crate::types::{Attribute, Schema};

pub mod constraints;
mod convert;
pub mod join_order;
pub mod model;

use constraints::ConstraintSet;
use join_order::JoinOrderTable;
use model::estimate_relation;

pub use convert::lower;

#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalPlan {
    Scan {
        table: String,
        alias: String,
        schema: Schema,
    },
    /// Tuples whose indexed key lies in `[low, high]`; a missing bound is open.
    IndexScan {
        table: String,
        alias: String,
        schema: Schema,
        index: IndexInfo,
        low: Option<i32>,
        high: Option<i32>,
    },
    Select {
        input: Box<PhysicalPlan>,
        predicate: Expression,
    },
    Project {
        input: Box<PhysicalPlan>,
        schema: Schema,
    },
    Sort {
        input: Box<PhysicalPlan>,
        order_by: Vec<Attribute>,
        algorithm: SortAlgorithm,
        buffer_pages: usize,
    },
    Distinct {
        input: Box<PhysicalPlan>,
    },
    /// A nested loop join, tuple or block at a time.
    Join {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        algorithm: JoinAlgorithm,
        condition: Option<Expression>,
        buffer_pages: usize,
    },
    /// Both inputs are sorts on the key columns, paired up position by position.
    SortMergeJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        left_keys: Vec<Attribute>,
        right_keys: Vec<Attribute>,
        residual: Option<Expression>,
    },
}

fn bound(value: Option<i32>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

fn scan_name(table: &str, alias: &str) -> String {
    if table == alias {
        table.to_string()
    } else {
        format!("{table} AS {alias}")
    }
}

impl PhysicalPlan {
    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{}", "-".repeat(depth))?;
        match self {
            PhysicalPlan::Scan { table, alias, .. } => {
                writeln!(f, "TableScan[{}]", scan_name(table, alias))?
            }
            PhysicalPlan::IndexScan {
                table,
                alias,
                index,
                low,
                high,
                ..
            } => writeln!(
                f,
                "IndexScan[{}, {}, {}, {}]",
                scan_name(table, alias),
                index.column,
                bound(*low),
                bound(*high)
            )?,
            PhysicalPlan::Select { predicate, .. } => writeln!(f, "Select[{predicate}]")?,
            PhysicalPlan::Project { schema, .. } => writeln!(f, "Project[{schema}]")?,
            PhysicalPlan::Sort {
                order_by, algorithm, ..
            } => {
                let keys: Vec<String> = order_by.iter().map(|a| a.to_string()).collect();
                let name = match algorithm {
                    SortAlgorithm::InMemory => "InMemorySort",
                    SortAlgorithm::External => "ExternalSort",
                };
                writeln!(f, "{name}[{}]", keys.join(", "))?
            }
            PhysicalPlan::Distinct { .. } => writeln!(f, "DupElim")?,
            PhysicalPlan::Join {
                algorithm,
                condition,
                ..
            } => match condition {
                Some(condition) => writeln!(f, "{algorithm}[{condition}]")?,
                None => writeln!(f, "{algorithm}[]")?,
            },
            PhysicalPlan::SortMergeJoin {
                left_keys,
                right_keys,
                residual,
                ..
            } => {
                let mut parts: Vec<String> = left_keys
                    .iter()
                    .zip(right_keys)
                    .map(|(l, r)| format!("{l} = {r}"))
                    .collect();
                if let Some(residual) = residual {
                    parts.push(residual.to_string());
                }
                writeln!(f, "SMJ[{}]", parts.join(" AND "))?
            }
        }
        match self {
            PhysicalPlan::Scan { .. } | PhysicalPlan::IndexScan { .. } => Ok(()),
            PhysicalPlan::Select { input, .. }
            | PhysicalPlan::Project { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Distinct { input } => input.fmt_tree(f, depth + 1),
            PhysicalPlan::Join { left, right, .. }
            | PhysicalPlan::SortMergeJoin { left, right, .. } => {
                left.fmt_tree(f, depth + 1)?;
                right.fmt_tree(f, depth + 1)
            }
        }
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

/// Rewrites and lowers `plan`.
pub fn optimize(plan: LogicalPlan, catalog: &Catalog) -> Result<PhysicalPlan, ExecutionError> {
    let plan = rewrite(plan, catalog)?;
    lower(plan, catalog)
}

/// Operators above the select-join core, outermost first.
enum Wrapper {
    Project(Schema),
    Sort(Vec<Attribute>),
    Distinct,
}

struct BaseTable {
    table: String,
    alias: String,
    schema: Schema,
}

impl BaseTable {
    fn scan(&self, constraints: &ConstraintSet) -> LogicalPlan {
        let scan = LogicalPlan::Scan {
            table: self.table.clone(),
            alias: self.alias.clone(),
            schema: self.schema.clone(),
        };
        match constraints.table_predicate(&self.alias) {
            Some(predicate) => LogicalPlan::Select {
                input: Box::new(scan),
                predicate,
            },
            None => scan,
        }
    }
}

fn gather(plan: LogicalPlan, tables: &mut Vec<BaseTable>, conjuncts: &mut Vec<Expression>) -> Result<(), ExecutionError> {
    match plan {
        LogicalPlan::Scan {
            table,
            alias,
            schema,
        } => tables.push(BaseTable {
            table,
            alias,
            schema,
        }),
        LogicalPlan::Select { input, predicate } => {
            conjuncts.push(predicate);
            gather(*input, tables, conjuncts)?;
        }
        LogicalPlan::Join {
            left,
            right,
            condition,
        } => {
            conjuncts.extend(condition);
            gather(*left, tables, conjuncts)?;
            gather(*right, tables, conjuncts)?;
        }
        other => {
            return Err(ExecutionError::PlanningError(format!(
                "unexpected operator below the joins:\n{other}"
            )))
        }
    }
    Ok(())
}

/// Replaces the select-join core of `plan` with per-table selections joined
/// in the cheapest left-deep order.
pub fn rewrite(plan: LogicalPlan, catalog: &Catalog) -> Result<LogicalPlan, ExecutionError> {
    let mut wrappers = Vec::new();
    let mut plan = plan;
    let core = loop {
        plan = match plan {
            LogicalPlan::Project { input, schema } => {
                wrappers.push(Wrapper::Project(schema));
                *input
            }
            LogicalPlan::Sort { input, order_by } => {
                wrappers.push(Wrapper::Sort(order_by));
                *input
            }
            LogicalPlan::Distinct { input } => {
                wrappers.push(Wrapper::Distinct);
                *input
            }
            other => break other,
        };
    };

    let mut tables = Vec::new();
    let mut conjuncts = Vec::new();
    gather(core, &mut tables, &mut conjuncts)?;
    let predicate = Expression::conjunction(conjuncts);
    let constraints = ConstraintSet::from_predicate(predicate.as_ref())?;

    let mut plan = if let [only] = tables.as_slice() {
        only.scan(&constraints)
    } else {
        let estimates = tables
            .iter()
            .map(|t| Ok(estimate_relation(&t.alias, catalog.table(&t.table)?, &constraints)))
            .collect::<Result<Vec<_>, ExecutionError>>()?;
        let table = JoinOrderTable::build(&estimates, &constraints)?;
        let best = table
            .best()
            .ok_or_else(|| ExecutionError::PlanningError("no join order found".to_string()))?;
        tracing::debug!(
            order = ?best.order.iter().map(|&i| tables[i].alias.as_str()).collect::<Vec<_>>(),
            size = best.size,
            cost = best.cost,
            "join order chosen"
        );

        let first = &tables[best.order[0]];
        let mut joined = vec![first.alias.clone()];
        let mut plan = first.scan(&constraints);
        for &position in &best.order[1..] {
            let inner = &tables[position];
            plan = LogicalPlan::Join {
                left: Box::new(plan),
                right: Box::new(inner.scan(&constraints)),
                condition: constraints.join_predicate(&joined, &inner.alias),
            };
            joined.push(inner.alias.clone());
        }
        plan
    };

    for wrapper in wrappers.into_iter().rev() {
        let input = Box::new(plan);
        plan = match wrapper {
            Wrapper::Project(schema) => LogicalPlan::Project { input, schema },
            Wrapper::Sort(order_by) => LogicalPlan::Sort { input, order_by },
            Wrapper::Distinct => LogicalPlan::Distinct { input },
        };
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use crate::config::PlanConfig;
    use crate::parser::parse_select;
    use crate::planner::create_logical_plan;
    use cobble::relation::write_all;
    use std::path::Path;

    fn database(db: &Path) {
        let sailors: Vec<Vec<i32>> = (0..1000).map(|i| vec![i, i % 10, i % 100]).collect();
        let reserves: Vec<Vec<i32>> = (0..200).map(|i| vec![i % 50, i]).collect();
        let boats: Vec<Vec<i32>> = (0..50).map(|i| vec![i, i * 2, i * 3]).collect();
        write_all(db.join("data/Sailors"), &sailors).unwrap();
        write_all(db.join("data/Reserves"), &reserves).unwrap();
        write_all(db.join("data/Boats"), &boats).unwrap();
    }

    fn catalog(db: &Path, plan: PlanConfig) -> Catalog {
        CatalogBuilder::new(db)
            .table("Sailors", &["A", "B", "C"])
            .table("Reserves", &["G", "H"])
            .table("Boats", &["D", "E", "F"])
            .plan(plan)
            .build()
            .unwrap()
    }

    fn rewritten(sql: &str, catalog: &Catalog) -> String {
        let logical = create_logical_plan(&parse_select(sql).unwrap(), catalog).unwrap();
        rewrite(logical, catalog).unwrap().to_string()
    }

    #[test]
    fn single_table_predicates_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        database(dir.path());
        let catalog = catalog(dir.path(), PlanConfig::default());
        assert_eq!(
            rewritten(
                "SELECT Boats.F FROM Boats WHERE Boats.D > 3 AND 10 >= Boats.D AND Boats.E <> 4",
                &catalog
            ),
            "Project[Boats.F]\n-Select[Boats.D >= 4 AND Boats.D <= 10 AND Boats.E <> 4]\n--Scan[Boats]\n"
        );
    }

    #[test]
    fn joins_follow_the_cheapest_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        database(dir.path());
        let catalog = catalog(dir.path(), PlanConfig::default());
        let text = rewritten(
            "SELECT * FROM Sailors S, Reserves R, Boats B WHERE S.A = R.G AND R.G = B.D AND S.B < 5",
            &catalog,
        );
        assert_eq!(
            text,
            "Join[S.A = R.G]\n\
             -Join[B.D = S.A]\n\
             --Scan[Boats AS B]\n\
             --Select[S.B <= 4]\n\
             ---Scan[Sailors AS S]\n\
             -Scan[Reserves AS R]\n"
        );
    }

    #[test]
    fn unsatisfiable_literals_fail_the_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        database(dir.path());
        let catalog = catalog(dir.path(), PlanConfig::default());
        let logical =
            create_logical_plan(&parse_select("SELECT * FROM Boats WHERE 1 > 2").unwrap(), &catalog).unwrap();
        assert!(matches!(
            rewrite(logical, &catalog),
            Err(ExecutionError::UnsatisfiablePredicate(_))
        ));
    }

    #[test]
    fn physical_plan_display() {
        let plan = PhysicalPlan::Distinct {
            input: Box::new(PhysicalPlan::Sort {
                input: Box::new(PhysicalPlan::SortMergeJoin {
                    left: Box::new(PhysicalPlan::Scan {
                        table: "Sailors".into(),
                        alias: "S".into(),
                        schema: Schema::new(vec![]),
                    }),
                    right: Box::new(PhysicalPlan::IndexScan {
                        table: "Reserves".into(),
                        alias: "Reserves".into(),
                        schema: Schema::new(vec![]),
                        index: IndexInfo {
                            table: "Reserves".into(),
                            column: "G".into(),
                            clustered: false,
                            order: 2,
                        },
                        low: Some(3),
                        high: None,
                    }),
                    left_keys: vec![Attribute::new("S", "A")],
                    right_keys: vec![Attribute::new("Reserves", "G")],
                    residual: None,
                }),
                order_by: vec![],
                algorithm: SortAlgorithm::External,
                buffer_pages: 3,
            }),
        };
        assert_eq!(
            plan.to_string(),
            "DupElim\n-ExternalSort[]\n--SMJ[S.A = Reserves.G]\n---TableScan[Sailors AS S]\n---IndexScan[Reserves, G, 3, null]\n"
        );
    }
}
