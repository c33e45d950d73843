use std::cmp::Ordering;

use cobble::PAGE_SIZE;

use super::eval::evaluate_predicate;
use super::{Executor, Operator};
use crate::errors::ExecutionError;
use crate::parser::Expression;
use crate::types::{Attribute, Schema, Tuple};

/// A missing condition joins every pair.
fn satisfies(condition: &Option<Expression>, tuple: &Tuple) -> Result<bool, ExecutionError> {
    match condition {
        Some(condition) => evaluate_predicate(condition, tuple),
        None => Ok(true),
    }
}

/// Rescans the whole right input for every left tuple.
pub struct NestedLoopJoinExecutor {
    left: Box<Operator>,
    right: Box<Operator>,
    condition: Option<Expression>,
    schema: Schema,
    left_tuple: Option<Tuple>,
    started: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(left: Box<Operator>, right: Box<Operator>, condition: Option<Expression>) -> Self {
        let schema = left.schema().concat(right.schema());
        tracing::debug!(condition = ?condition.as_ref().map(|c| c.to_string()), "tuple nested loop join");
        Self {
            left,
            right,
            condition,
            schema,
            left_tuple: None,
            started: false,
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.started {
            self.left_tuple = self.left.next()?;
            self.started = true;
        }
        loop {
            let Some(left) = &self.left_tuple else {
                return Ok(None);
            };
            match self.right.next()? {
                Some(right) => {
                    let merged = left.merge(&right, &self.schema);
                    if satisfies(&self.condition, &merged)? {
                        return Ok(Some(merged));
                    }
                }
                None => {
                    self.left_tuple = self.left.next()?;
                    if self.left_tuple.is_none() {
                        return Ok(None);
                    }
                    self.right.reset()?;
                }
            }
        }
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.left.reset()?;
        self.right.reset()?;
        self.left_tuple = None;
        self.started = false;
        Ok(())
    }
}

/// Buffers a block of left tuples and scans the right input once per block.
pub struct BlockNestedLoopJoinExecutor {
    left: Box<Operator>,
    right: Box<Operator>,
    condition: Option<Expression>,
    schema: Schema,
    capacity: usize,
    block: Vec<Tuple>,
    block_position: usize,
    right_tuple: Option<Tuple>,
    started: bool,
}

impl BlockNestedLoopJoinExecutor {
    pub fn new(
        left: Box<Operator>,
        right: Box<Operator>,
        condition: Option<Expression>,
        buffer_pages: usize,
    ) -> Self {
        let schema = left.schema().concat(right.schema());
        let width = left.schema().len().max(1);
        let capacity = (buffer_pages * PAGE_SIZE / (4 * width)).max(1);
        tracing::debug!(buffer_pages, capacity, "block nested loop join");
        Self {
            left,
            right,
            condition,
            schema,
            capacity,
            block: Vec::with_capacity(capacity),
            block_position: 0,
            right_tuple: None,
            started: false,
        }
    }

    /// Refills the block; returns false once the left input is exhausted.
    fn fill_block(&mut self) -> Result<bool, ExecutionError> {
        self.block.clear();
        while self.block.len() < self.capacity {
            match self.left.next()? {
                Some(tuple) => self.block.push(tuple),
                None => break,
            }
        }
        self.block_position = 0;
        Ok(!self.block.is_empty())
    }
}

impl Executor for BlockNestedLoopJoinExecutor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.started {
            self.started = true;
            if !self.fill_block()? {
                return Ok(None);
            }
            self.right_tuple = self.right.next()?;
        }
        loop {
            if self.block.is_empty() {
                return Ok(None);
            }
            match &self.right_tuple {
                Some(right) if self.block_position < self.block.len() => {
                    let merged = self.block[self.block_position].merge(right, &self.schema);
                    self.block_position += 1;
                    if satisfies(&self.condition, &merged)? {
                        return Ok(Some(merged));
                    }
                }
                Some(_) => {
                    self.right_tuple = self.right.next()?;
                    self.block_position = 0;
                }
                None => {
                    if !self.fill_block()? {
                        return Ok(None);
                    }
                    self.right.reset()?;
                    self.right_tuple = self.right.next()?;
                }
            }
        }
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.left.reset()?;
        self.right.reset()?;
        self.block.clear();
        self.block_position = 0;
        self.right_tuple = None;
        self.started = false;
        Ok(())
    }
}

/// Merges two inputs sorted on their key columns. The right input must support
/// [`Executor::reset_to`]: each left tuple of a run of equal keys rereads the
/// matching right run from its first position.
pub struct SortMergeJoinExecutor {
    left: Box<Operator>,
    right: Box<Operator>,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    residual: Option<Expression>,
    schema: Schema,
    left_tuple: Option<Tuple>,
    right_tuple: Option<Tuple>,
    /// Output position of `right_tuple` in the right input.
    right_index: usize,
    /// Position of the first right tuple of the run being joined.
    mark: Option<usize>,
    started: bool,
}

impl SortMergeJoinExecutor {
    pub fn new(
        left: Box<Operator>,
        right: Box<Operator>,
        left_keys: &[Attribute],
        right_keys: &[Attribute],
        residual: Option<Expression>,
    ) -> Result<Self, ExecutionError> {
        if left_keys.is_empty() || left_keys.len() != right_keys.len() {
            return Err(ExecutionError::PlanningError(format!(
                "sort-merge join needs matching key lists, got {} and {} columns",
                left_keys.len(),
                right_keys.len()
            )));
        }
        let left_keys = left_keys
            .iter()
            .map(|a| left.schema().index_of(a))
            .collect::<Result<Vec<_>, _>>()?;
        let right_keys = right_keys
            .iter()
            .map(|a| right.schema().index_of(a))
            .collect::<Result<Vec<_>, _>>()?;
        let schema = left.schema().concat(right.schema());
        tracing::debug!(keys = left_keys.len(), "sort merge join");
        Ok(Self {
            left,
            right,
            left_keys,
            right_keys,
            residual,
            schema,
            left_tuple: None,
            right_tuple: None,
            right_index: 0,
            mark: None,
            started: false,
        })
    }

    fn compare_keys(&self, left: &Tuple, right: &Tuple) -> Ordering {
        let l = self.left_keys.iter().map(|&i| left.values()[i]);
        let r = self.right_keys.iter().map(|&i| right.values()[i]);
        l.cmp(r)
    }

    fn advance_right(&mut self) -> Result<(), ExecutionError> {
        self.right_tuple = self.right.next()?;
        self.right_index += 1;
        Ok(())
    }
}

impl Executor for SortMergeJoinExecutor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.started {
            self.started = true;
            self.left_tuple = self.left.next()?;
            self.right_tuple = self.right.next()?;
            self.right_index = 0;
        }
        loop {
            let Some(left) = self.left_tuple.as_ref() else {
                return Ok(None);
            };

            if self.mark.is_none() {
                let Some(right) = self.right_tuple.as_ref() else {
                    return Ok(None);
                };
                match self.compare_keys(left, right) {
                    Ordering::Less => self.left_tuple = self.left.next()?,
                    Ordering::Greater => self.advance_right()?,
                    Ordering::Equal => self.mark = Some(self.right_index),
                }
                continue;
            }

            match self.right_tuple.as_ref() {
                Some(right) if self.compare_keys(left, right) == Ordering::Equal => {
                    let merged = left.merge(right, &self.schema);
                    self.advance_right()?;
                    let residual = &self.residual;
                    if satisfies(residual, &merged)? {
                        return Ok(Some(merged));
                    }
                }
                _ => {
                    // The run is done for this left tuple; the next one may
                    // share its key, so go back to the start of the run.
                    let mark = self.mark.take().unwrap_or(self.right_index);
                    self.left_tuple = self.left.next()?;
                    if self.left_tuple.is_none() {
                        return Ok(None);
                    }
                    self.right.reset_to(mark)?;
                    self.right_index = mark;
                    self.right_tuple = self.right.next()?;
                }
            }
        }
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.left.reset()?;
        self.right.reset()?;
        self.left_tuple = None;
        self.right_tuple = None;
        self.right_index = 0;
        self.mark = None;
        self.started = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{rows, schema, values};
    use crate::executor::SortExecutor;
    use crate::parser::BinaryOperator;
    use proptest::prelude::*;

    fn equi(left: &str, right: &str) -> Expression {
        let column = |name: &str| {
            let (table, column) = name.split_once('.').unwrap();
            Expression::Column(Attribute::new(table, column))
        };
        Expression::binary(column(left), BinaryOperator::Eq, column(right))
    }

    fn sorted(mut data: Vec<Vec<i32>>) -> Vec<Vec<i32>> {
        data.sort();
        data
    }

    fn boxed(s: &Schema, data: &[Vec<i32>]) -> Box<Operator> {
        let refs: Vec<&[i32]> = data.iter().map(Vec::as_slice).collect();
        values(s, &refs)
    }

    fn sort_on(input: Box<Operator>, key: &str) -> Box<Operator> {
        let (table, column) = key.split_once('.').unwrap();
        Box::new(Operator::Sort(
            SortExecutor::new(input, &[Attribute::new(table, column)]).unwrap(),
        ))
    }

    fn run_all(sailors: &[Vec<i32>], reserves: &[Vec<i32>], pages: usize) -> [Vec<Vec<i32>>; 3] {
        let s = schema("S", &["A", "B", "C"]);
        let r = schema("R", &["G", "H"]);
        let condition = Some(equi("S.A", "R.G"));

        let mut tnlj = NestedLoopJoinExecutor::new(boxed(&s, sailors), boxed(&r, reserves), condition.clone());
        let mut bnlj =
            BlockNestedLoopJoinExecutor::new(boxed(&s, sailors), boxed(&r, reserves), condition, pages);
        let mut smj = SortMergeJoinExecutor::new(
            sort_on(boxed(&s, sailors), "S.A"),
            sort_on(boxed(&r, reserves), "R.G"),
            &[Attribute::new("S", "A")],
            &[Attribute::new("R", "G")],
            None,
        )
        .unwrap();
        [
            sorted(rows(&mut tnlj)),
            sorted(rows(&mut bnlj)),
            sorted(rows(&mut smj)),
        ]
    }

    #[test]
    fn single_matching_pair_agrees_across_algorithms() {
        let sailors = vec![vec![1, 200, 50], vec![2, 200, 200], vec![3, 100, 105]];
        let reserves = vec![vec![3, 101], vec![9, 102]];
        for pages in [1, 2, 5] {
            for result in run_all(&sailors, &reserves, pages) {
                assert_eq!(result, vec![vec![3, 100, 105, 3, 101]]);
            }
        }
    }

    #[test]
    fn cross_product_without_condition() {
        let s = schema("S", &["A"]);
        let r = schema("R", &["G"]);
        let mut tnlj = NestedLoopJoinExecutor::new(values(&s, &[&[1], &[2]]), values(&r, &[&[7], &[8]]), None);
        assert_eq!(rows(&mut tnlj), vec![vec![1, 7], vec![1, 8], vec![2, 7], vec![2, 8]]);
        tnlj.reset().unwrap();
        assert_eq!(rows(&mut tnlj).len(), 4);
    }

    #[test]
    fn block_join_with_tiny_blocks_resets_between_blocks() {
        // A width of 1200 columns fits a single tuple per one-page block.
        let columns: Vec<String> = (0..1200).map(|i| format!("c{i}")).collect();
        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        let s = schema("S", &names);
        let r = schema("R", &["G"]);
        let left: Vec<Vec<i32>> = (0..3).map(|v| vec![v; 1200]).collect();
        let right = vec![vec![0], vec![2], vec![2]];
        let condition = Some(equi("S.c0", "R.G"));
        let mut bnlj = BlockNestedLoopJoinExecutor::new(boxed(&s, &left), boxed(&r, &right), condition, 1);
        assert_eq!(bnlj.capacity, 1);
        let keys: Vec<(i32, i32)> = rows(&mut bnlj).iter().map(|t| (t[0], t[1200])).collect();
        assert_eq!(keys, vec![(0, 0), (2, 2), (2, 2)]);
        bnlj.reset().unwrap();
        assert_eq!(rows(&mut bnlj).len(), 3);
    }

    #[test]
    fn merge_join_revisits_runs_and_applies_residual() {
        let s = schema("S", &["A", "B"]);
        let r = schema("R", &["G", "H"]);
        let left = vec![vec![1, 0], vec![2, 5], vec![2, 6], vec![4, 0]];
        let right = vec![vec![2, 5], vec![2, 9], vec![3, 0], vec![4, 1]];
        let residual = Expression::binary(
            Expression::Column(Attribute::new("S", "B")),
            BinaryOperator::LtEq,
            Expression::Column(Attribute::new("R", "H")),
        );
        let mut smj = SortMergeJoinExecutor::new(
            sort_on(boxed(&s, &left), "S.A"),
            sort_on(boxed(&r, &right), "R.G"),
            &[Attribute::new("S", "A")],
            &[Attribute::new("R", "G")],
            Some(residual),
        )
        .unwrap();
        let expected = vec![
            vec![2, 5, 2, 5],
            vec![2, 5, 2, 9],
            vec![2, 6, 2, 9],
            vec![4, 0, 4, 1],
        ];
        assert_eq!(rows(&mut smj), expected);
        smj.reset().unwrap();
        assert_eq!(rows(&mut smj), expected);
    }

    #[test]
    fn merge_join_rejects_mismatched_keys() {
        let s = schema("S", &["A"]);
        let r = schema("R", &["G"]);
        assert!(SortMergeJoinExecutor::new(values(&s, &[]), values(&r, &[]), &[], &[], None).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn join_algorithms_agree(
            sailors in prop::collection::vec(prop::collection::vec(0i32..8, 3), 0..40),
            reserves in prop::collection::vec(prop::collection::vec(0i32..8, 2), 0..40),
            pages in 1usize..4,
        ) {
            let [tnlj, bnlj, smj] = run_all(&sailors, &reserves, pages);
            prop_assert_eq!(&tnlj, &bnlj);
            prop_assert_eq!(&tnlj, &smj);
        }
    }
}
