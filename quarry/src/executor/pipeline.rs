use super::eval::evaluate_predicate;
use super::{Executor, Operator};
use crate::errors::ExecutionError;
use crate::parser::Expression;
use crate::types::{Schema, Tuple};

pub struct FilterExecutor {
    input: Box<Operator>,
    predicate: Expression,
}

impl FilterExecutor {
    pub fn new(input: Box<Operator>, predicate: Expression) -> Self {
        Self { input, predicate }
    }
}

impl Executor for FilterExecutor {
    fn schema(&self) -> &Schema {
        self.input.schema()
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        while let Some(tuple) = self.input.next()? {
            if evaluate_predicate(&self.predicate, &tuple)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.input.reset()
    }
}

pub struct ProjectionExecutor {
    input: Box<Operator>,
    schema: Schema,
    positions: Vec<usize>,
}

impl ProjectionExecutor {
    /// Fails when a projected column is not produced by `input`.
    pub fn new(input: Box<Operator>, schema: Schema) -> Result<Self, ExecutionError> {
        let positions = schema
            .attributes()
            .iter()
            .map(|attribute| input.schema().index_of(attribute))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            input,
            schema,
            positions,
        })
    }
}

impl Executor for ProjectionExecutor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        let Some(tuple) = self.input.next()? else {
            return Ok(None);
        };
        let values = self.positions.iter().map(|&i| tuple.values()[i]).collect();
        Ok(Some(Tuple::new(self.schema.clone(), values)))
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.input.reset()
    }
}

/// Drops tuples equal to the one returned just before. Only removes every
/// duplicate when the input is sorted.
pub struct DistinctExecutor {
    input: Box<Operator>,
    last: Option<Tuple>,
}

impl DistinctExecutor {
    pub fn new(input: Box<Operator>) -> Self {
        Self { input, last: None }
    }
}

impl Executor for DistinctExecutor {
    fn schema(&self) -> &Schema {
        self.input.schema()
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        while let Some(tuple) = self.input.next()? {
            if self.last.as_ref() != Some(&tuple) {
                self.last = Some(tuple.clone());
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.last = None;
        self.input.reset()
    }
}

/// Tuples held in memory.
pub struct ValuesExecutor {
    schema: Schema,
    tuples: Vec<Tuple>,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(schema: Schema, tuples: Vec<Tuple>) -> Self {
        Self {
            schema,
            tuples,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        let tuple = self.tuples.get(self.cursor).cloned();
        if tuple.is_some() {
            self.cursor += 1;
        }
        Ok(tuple)
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.cursor = 0;
        Ok(())
    }

    fn reset_to(&mut self, index: usize) -> Result<(), ExecutionError> {
        self.cursor = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{rows, schema, values};
    use crate::parser::parse_select;
    use crate::types::Attribute;
    use proptest::prelude::*;

    fn predicate(condition: &str) -> Expression {
        parse_select(&format!("SELECT * FROM T WHERE {condition}"))
            .unwrap()
            .where_clause
            .unwrap()
    }

    #[test]
    fn filter_keeps_exactly_the_matching_tuples() {
        let s = schema("T", &["a", "b"]);
        let input: &[&[i32]] = &[&[1, 5], &[2, 4], &[3, 3], &[4, 2]];
        let mut filter = FilterExecutor::new(values(&s, input), predicate("T.a < T.b AND T.a >= 2"));
        assert_eq!(rows(&mut filter), vec![vec![2, 4]]);
        filter.reset().unwrap();
        assert_eq!(rows(&mut filter), vec![vec![2, 4]]);
    }

    #[test]
    fn projection_reorders_and_rejects_unknown_columns() {
        let s = schema("T", &["a", "b", "c"]);
        let target = Schema::new(vec![Attribute::new("T", "c"), Attribute::new("T", "a")]);
        let mut project = ProjectionExecutor::new(values(&s, &[&[1, 2, 3], &[4, 5, 6]]), target).unwrap();
        assert_eq!(rows(&mut project), vec![vec![3, 1], vec![6, 4]]);

        let unknown = Schema::new(vec![Attribute::new("T", "z")]);
        assert!(matches!(
            ProjectionExecutor::new(values(&s, &[]), unknown),
            Err(ExecutionError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn distinct_drops_adjacent_repeats() {
        let s = schema("T", &["a", "b"]);
        let input: &[&[i32]] = &[&[1, 1], &[1, 1], &[1, 2], &[2, 2], &[2, 2], &[2, 2]];
        let mut distinct = DistinctExecutor::new(values(&s, input));
        let expected = vec![vec![1, 1], vec![1, 2], vec![2, 2]];
        assert_eq!(rows(&mut distinct), expected);
        distinct.reset().unwrap();
        assert_eq!(rows(&mut distinct), expected);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn distinct_keeps_each_sorted_value_once(mut data in prop::collection::vec(prop::collection::vec(0i32..4, 2), 0..200)) {
            data.sort();
            let s = schema("T", &["a", "b"]);
            let tuples = data.iter().map(|v| Tuple::new(s.clone(), v.clone())).collect();
            let input = Box::new(Operator::Values(ValuesExecutor::new(s.clone(), tuples)));
            let output = rows(&mut DistinctExecutor::new(input));

            for pair in output.windows(2) {
                prop_assert_ne!(&pair[0], &pair[1]);
            }
            let mut expected = data.clone();
            expected.dedup();
            prop_assert_eq!(output, expected);
        }
    }
}
