use cobble::btree::IndexReader;

use super::model::{index_scan_cost, reduction_factor, scan_cost};
use super::PhysicalPlan;
use crate::catalog::{Catalog, ColumnStats, IndexInfo};
use crate::config::{JoinAlgorithm, SortAlgorithm};
use crate::errors::ExecutionError;
use crate::executor::eval::index_range;
use crate::parser::{BinaryOperator, Expression};
use crate::planner::LogicalPlan;
use crate::types::{Attribute, Schema};

/// Chooses an access path for every selection over a scan and an algorithm
/// for every join.
pub fn lower(plan: LogicalPlan, catalog: &Catalog) -> Result<PhysicalPlan, ExecutionError> {
    let physical = match plan {
        LogicalPlan::Scan {
            table,
            alias,
            schema,
        } => PhysicalPlan::Scan {
            table,
            alias,
            schema,
        },
        LogicalPlan::Select { input, predicate } => match *input {
            LogicalPlan::Scan {
                table,
                alias,
                schema,
            } if catalog.plan().use_indexes => access_path(table, alias, schema, predicate, catalog)?,
            other => PhysicalPlan::Select {
                input: Box::new(lower(other, catalog)?),
                predicate,
            },
        },
        LogicalPlan::Join {
            left,
            right,
            condition,
        } => lower_join(*left, *right, condition, catalog)?,
        LogicalPlan::Project { input, schema } => PhysicalPlan::Project {
            input: Box::new(lower(*input, catalog)?),
            schema,
        },
        LogicalPlan::Sort { input, order_by } => PhysicalPlan::Sort {
            input: Box::new(lower(*input, catalog)?),
            order_by,
            algorithm: catalog.plan().sort,
            buffer_pages: catalog.plan().sort_buffer_pages,
        },
        LogicalPlan::Distinct { input } => PhysicalPlan::Distinct {
            input: Box::new(lower(*input, catalog)?),
        },
    };
    Ok(physical)
}

struct IndexChoice {
    cost: f64,
    index: IndexInfo,
    low: Option<i32>,
    high: Option<i32>,
    residual: Option<Expression>,
}

/// Index scan when some index answers part of `predicate` for fewer page
/// reads than the full scan, otherwise the full scan followed by the selection.
fn access_path(
    table: String,
    alias: String,
    schema: Schema,
    predicate: Expression,
    catalog: &Catalog,
) -> Result<PhysicalPlan, ExecutionError> {
    let info = catalog.table(&table)?;
    let full_cost = scan_cost(&info.stats);
    let mut best: Option<IndexChoice> = None;

    for index in &info.indexes {
        let range = index_range(&predicate, Attribute::new(alias.as_str(), index.column.as_str()))?;
        if !range.is_bounded() {
            continue;
        }
        // An empty range is left to the selection, which rejects every tuple.
        let Some((low, high)) = range.key_bounds() else {
            continue;
        };
        let leaves = match IndexReader::open(catalog.index_path(index)) {
            Ok(reader) => reader.header().leaf_count,
            Err(err) => {
                tracing::warn!(index = %index.name(), error = %err, "index unavailable, not considered");
                continue;
            }
        };
        let stats = info
            .column_stats(&index.column)
            .unwrap_or(ColumnStats { min: 0, max: 0 });
        let reduction = reduction_factor(stats, range.low, range.high);
        let cost = index_scan_cost(index, &info.stats, leaves, reduction);
        tracing::debug!(index = %index.name(), cost, full_cost, reduction, "index costed");
        if cost < full_cost && best.as_ref().map_or(true, |b| cost < b.cost) {
            best = Some(IndexChoice {
                cost,
                index: index.clone(),
                low,
                high,
                residual: range.residual_predicate(),
            });
        }
    }

    let plan = match best {
        Some(choice) => {
            let scan = PhysicalPlan::IndexScan {
                table,
                alias,
                schema,
                index: choice.index,
                low: choice.low,
                high: choice.high,
            };
            match choice.residual {
                Some(predicate) => PhysicalPlan::Select {
                    input: Box::new(scan),
                    predicate,
                },
                None => scan,
            }
        }
        None => PhysicalPlan::Select {
            input: Box::new(PhysicalPlan::Scan {
                table,
                alias,
                schema,
            }),
            predicate,
        },
    };
    Ok(plan)
}

/// Equality conjuncts between a column of each side, as (left, right) pairs,
/// and whatever else the condition says.
fn split_equi_join(
    condition: Option<Expression>,
    left: &Schema,
    right: &Schema,
) -> (Vec<Attribute>, Vec<Attribute>, Vec<Expression>) {
    let (mut left_keys, mut right_keys, mut residual) = (Vec::new(), Vec::new(), Vec::new());
    let Some(condition) = condition else {
        return (left_keys, right_keys, residual);
    };
    for conjunct in condition.conjuncts() {
        if let Expression::Binary {
            left: a,
            op: BinaryOperator::Eq,
            right: b,
        } = conjunct
        {
            if let (Expression::Column(a), Expression::Column(b)) = (&**a, &**b) {
                if left.contains(a) && right.contains(b) {
                    left_keys.push(a.clone());
                    right_keys.push(b.clone());
                    continue;
                }
                if left.contains(b) && right.contains(a) {
                    left_keys.push(b.clone());
                    right_keys.push(a.clone());
                    continue;
                }
            }
        }
        residual.push(conjunct.clone());
    }
    (left_keys, right_keys, residual)
}

fn lower_join(
    left: LogicalPlan,
    right: LogicalPlan,
    condition: Option<Expression>,
    catalog: &Catalog,
) -> Result<PhysicalPlan, ExecutionError> {
    let config = catalog.plan();
    let algorithm = match config.join {
        JoinAlgorithm::Smj => {
            let (left_keys, right_keys, residual) =
                split_equi_join(condition.clone(), &left.schema(), &right.schema());
            if !left_keys.is_empty() {
                let sorted = |input: LogicalPlan, order_by: Vec<Attribute>| {
                    lower(input, catalog).map(|input| PhysicalPlan::Sort {
                        input: Box::new(input),
                        order_by,
                        algorithm: SortAlgorithm::External,
                        buffer_pages: config.sort_buffer_pages.max(3),
                    })
                };
                return Ok(PhysicalPlan::SortMergeJoin {
                    left: Box::new(sorted(left, left_keys.clone())?),
                    right: Box::new(sorted(right, right_keys.clone())?),
                    left_keys,
                    right_keys,
                    residual: Expression::conjunction(residual),
                });
            }
            tracing::warn!(
                condition = ?condition.as_ref().map(|c| c.to_string()),
                "no equality links the join inputs, using a block nested loop join"
            );
            JoinAlgorithm::Bnlj
        }
        other => other,
    };
    Ok(PhysicalPlan::Join {
        left: Box::new(lower(left, catalog)?),
        right: Box::new(lower(right, catalog)?),
        algorithm,
        condition,
        buffer_pages: config.join_buffer_pages,
    })
}
