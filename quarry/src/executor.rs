//! The query executor.
//!
//! Physical operators pull tuples from their children one at a time. The set of
//! operators is closed: [`Operator`] holds one of them and forwards the
//! [`Executor`] protocol to it.
use std::path::Path;

use cobble::relation::TupleWriter;

use crate::catalog::Catalog;
use crate::config::{JoinAlgorithm, SortAlgorithm};
use crate::errors::{ExecutionError, IoContext};
use crate::optimizer::PhysicalPlan;
use crate::types::{Schema, Tuple};

pub mod eval;
mod join;
mod pipeline;
mod scan;
mod sort;

pub use join::{BlockNestedLoopJoinExecutor, NestedLoopJoinExecutor, SortMergeJoinExecutor};
pub use pipeline::{DistinctExecutor, FilterExecutor, ProjectionExecutor, ValuesExecutor};
pub use scan::{IndexScanExecutor, TableScanExecutor};
pub use sort::{ExternalSortExecutor, SortExecutor};

pub trait Executor {
    fn schema(&self) -> &Schema;

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError>;

    /// Rewinds to the first tuple; the output that follows is identical.
    fn reset(&mut self) -> Result<(), ExecutionError>;

    /// Positions the operator so that the next tuple is the `index`-th of its
    /// output. Only materializing operators support this.
    fn reset_to(&mut self, index: usize) -> Result<(), ExecutionError> {
        Err(ExecutionError::PlanningError(format!(
            "operator cannot be repositioned to tuple {index}"
        )))
    }
}

pub enum Operator {
    TableScan(TableScanExecutor),
    IndexScan(IndexScanExecutor),
    Filter(FilterExecutor),
    Projection(ProjectionExecutor),
    Sort(SortExecutor),
    ExternalSort(ExternalSortExecutor),
    Distinct(DistinctExecutor),
    NestedLoopJoin(NestedLoopJoinExecutor),
    BlockNestedLoopJoin(BlockNestedLoopJoinExecutor),
    SortMergeJoin(SortMergeJoinExecutor),
    Values(ValuesExecutor),
}

macro_rules! dispatch {
    ($operator:expr, $inner:ident => $call:expr) => {
        match $operator {
            Operator::TableScan($inner) => $call,
            Operator::IndexScan($inner) => $call,
            Operator::Filter($inner) => $call,
            Operator::Projection($inner) => $call,
            Operator::Sort($inner) => $call,
            Operator::ExternalSort($inner) => $call,
            Operator::Distinct($inner) => $call,
            Operator::NestedLoopJoin($inner) => $call,
            Operator::BlockNestedLoopJoin($inner) => $call,
            Operator::SortMergeJoin($inner) => $call,
            Operator::Values($inner) => $call,
        }
    };
}

impl Executor for Operator {
    fn schema(&self) -> &Schema {
        dispatch!(self, op => op.schema())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        dispatch!(self, op => op.next())
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        dispatch!(self, op => op.reset())
    }

    fn reset_to(&mut self, index: usize) -> Result<(), ExecutionError> {
        dispatch!(self, op => op.reset_to(index))
    }
}

/// What operators need from outside the plan while they are built.
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    pub catalog: &'a Catalog,
    /// Directory for sort runs. Removing it is up to the caller.
    pub scratch: &'a Path,
}

impl Operator {
    pub fn build(plan: &PhysicalPlan, ctx: &ExecContext<'_>) -> Result<Operator, ExecutionError> {
        let child = |input: &PhysicalPlan| Operator::build(input, ctx).map(Box::new);
        let operator = match plan {
            PhysicalPlan::Scan { table, schema, .. } => Operator::TableScan(TableScanExecutor::open(
                ctx.catalog.relation_path(table),
                table,
                schema.clone(),
            )?),
            PhysicalPlan::IndexScan {
                table,
                alias,
                schema,
                index,
                low,
                high,
            } => Operator::IndexScan(IndexScanExecutor::open(
                ctx.catalog,
                table,
                alias,
                schema.clone(),
                index,
                *low,
                *high,
            )?),
            PhysicalPlan::Select { input, predicate } => {
                Operator::Filter(FilterExecutor::new(child(input)?, predicate.clone()))
            }
            PhysicalPlan::Project { input, schema } => {
                Operator::Projection(ProjectionExecutor::new(child(input)?, schema.clone())?)
            }
            PhysicalPlan::Sort {
                input,
                order_by,
                algorithm,
                buffer_pages,
            } => match algorithm {
                SortAlgorithm::InMemory => {
                    Operator::Sort(SortExecutor::new(child(input)?, order_by)?)
                }
                SortAlgorithm::External => Operator::ExternalSort(
                    ExternalSortExecutor::new(child(input)?, order_by, *buffer_pages, ctx.scratch)?,
                ),
            },
            PhysicalPlan::Distinct { input } => Operator::Distinct(DistinctExecutor::new(child(input)?)),
            PhysicalPlan::Join {
                left,
                right,
                algorithm,
                condition,
                buffer_pages,
            } => match algorithm {
                JoinAlgorithm::Tnlj => Operator::NestedLoopJoin(NestedLoopJoinExecutor::new(
                    child(left)?,
                    child(right)?,
                    condition.clone(),
                )),
                JoinAlgorithm::Bnlj => Operator::BlockNestedLoopJoin(BlockNestedLoopJoinExecutor::new(
                    child(left)?,
                    child(right)?,
                    condition.clone(),
                    *buffer_pages,
                )),
                JoinAlgorithm::Smj => {
                    return Err(ExecutionError::PlanningError(
                        "sort-merge joins are planned with their key columns".to_string(),
                    ))
                }
            },
            PhysicalPlan::SortMergeJoin {
                left,
                right,
                left_keys,
                right_keys,
                residual,
            } => Operator::SortMergeJoin(SortMergeJoinExecutor::new(
                child(left)?,
                child(right)?,
                left_keys,
                right_keys,
                residual.clone(),
            )?),
        };
        Ok(operator)
    }
}

/// Drains `operator` into memory.
pub fn collect(operator: &mut dyn Executor) -> Result<Vec<Tuple>, ExecutionError> {
    let mut tuples = Vec::new();
    while let Some(tuple) = operator.next()? {
        tuples.push(tuple);
    }
    Ok(tuples)
}

/// Drains `operator` into a relation file and returns the number of tuples.
pub fn write_output(operator: &mut dyn Executor, path: &Path) -> Result<u64, ExecutionError> {
    let context = || format!("output {}", path.display());
    let mut writer = TupleWriter::create(path).with_context(context)?;
    while let Some(tuple) = operator.next()? {
        writer.write(tuple.values()).with_context(context)?;
    }
    writer.finish().with_context(context)
}
