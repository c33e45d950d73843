//! In-memory rows and their column identities.
use std::fmt;
use std::sync::Arc;

use crate::errors::ExecutionError;

/// A column as seen by a query: the table alias it is reached through and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attribute {
    pub table: String,
    pub column: String,
}

impl Attribute {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Ordered column list shared by every tuple an operator produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    attributes: Arc<[Attribute]>,
}

impl Schema {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self {
            attributes: attributes.into(),
        }
    }

    /// The columns of a table reached through `alias`.
    pub fn for_table(alias: &str, columns: &[String]) -> Self {
        Self::new(
            columns
                .iter()
                .map(|column| Attribute::new(alias, column.as_str()))
                .collect(),
        )
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn position(&self, attribute: &Attribute) -> Option<usize> {
        self.attributes.iter().position(|a| a == attribute)
    }

    pub fn index_of(&self, attribute: &Attribute) -> Result<usize, ExecutionError> {
        self.position(attribute)
            .ok_or_else(|| ExecutionError::ColumnNotFound(attribute.to_string()))
    }

    pub fn contains(&self, attribute: &Attribute) -> bool {
        self.position(attribute).is_some()
    }

    /// Left columns followed by right columns.
    pub fn concat(&self, right: &Schema) -> Schema {
        Self::new(
            self.attributes
                .iter()
                .chain(right.attributes.iter())
                .cloned()
                .collect(),
        )
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attribute) in self.attributes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{attribute}")?;
        }
        Ok(())
    }
}

/// One row. Equality compares values only, so callers compare tuples of
/// aligned schemas.
#[derive(Debug, Clone)]
pub struct Tuple {
    schema: Schema,
    values: Vec<i32>,
}

impl Tuple {
    pub fn new(schema: Schema, values: Vec<i32>) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self { schema, values }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<i32> {
        self.values
    }

    pub fn get(&self, attribute: &Attribute) -> Option<i32> {
        self.schema.position(attribute).map(|i| self.values[i])
    }

    /// Rebuilds the tuple with the columns of `target`, in its order.
    pub fn project(&self, target: &Schema) -> Result<Tuple, ExecutionError> {
        let values = target
            .attributes()
            .iter()
            .map(|attribute| {
                self.get(attribute)
                    .ok_or_else(|| ExecutionError::ColumnNotFound(attribute.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Tuple::new(target.clone(), values))
    }

    /// Concatenates this tuple with `right` under the already joined `schema`.
    pub fn merge(&self, right: &Tuple, schema: &Schema) -> Tuple {
        let mut values = Vec::with_capacity(self.values.len() + right.values.len());
        values.extend_from_slice(&self.values);
        values.extend_from_slice(&right.values);
        Tuple::new(schema.clone(), values)
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", text.join(","))
    }
}
