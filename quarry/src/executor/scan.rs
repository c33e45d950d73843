use std::io;
use std::path::Path;

use cobble::btree::IndexReader;
use cobble::relation::TupleReader;

use super::Executor;
use crate::catalog::{Catalog, IndexInfo};
use crate::errors::{index_error, ExecutionError, IoContext};
use crate::types::{Attribute, Schema, Tuple};

fn relation_context(table: &str) -> impl Fn() -> String + Copy + '_ {
    move || format!("relation {table}")
}

fn to_tuple(table: &str, schema: &Schema, values: Vec<i32>) -> Result<Tuple, ExecutionError> {
    if values.len() != schema.len() {
        return Err(ExecutionError::Io {
            context: format!("relation {table}"),
            source: io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "tuple has {} values but the table has {} columns",
                    values.len(),
                    schema.len()
                ),
            ),
        });
    }
    Ok(Tuple::new(schema.clone(), values))
}

/// Reads a base relation page by page.
pub struct TableScanExecutor {
    table: String,
    schema: Schema,
    reader: TupleReader,
}

impl TableScanExecutor {
    pub fn open<P: AsRef<Path>>(path: P, table: &str, schema: Schema) -> Result<Self, ExecutionError> {
        let reader = TupleReader::open(path.as_ref()).with_context(relation_context(table))?;
        tracing::debug!(table, pages = reader.num_pages(), "table scan opened");
        Ok(Self {
            table: table.to_string(),
            schema,
            reader,
        })
    }
}

impl Executor for TableScanExecutor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        match self.reader.next().with_context(relation_context(&self.table))? {
            Some(values) => to_tuple(&self.table, &self.schema, values).map(Some),
            None => Ok(None),
        }
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.reader.reset();
        Ok(())
    }
}

/// Returns the tuples whose key lies in `[low, high]`, in key order.
///
/// A clustered index is only used to find the first match; the sorted base
/// relation is then read sequentially until the key passes `high`. An
/// unclustered index is walked entry by entry, fetching each tuple by record id.
pub struct IndexScanExecutor {
    table: String,
    index_name: String,
    schema: Schema,
    reader: TupleReader,
    index: IndexReader,
    clustered: bool,
    key_position: usize,
    low: Option<i32>,
    high: Option<i32>,
    started: bool,
    done: bool,
}

impl IndexScanExecutor {
    pub fn open(
        catalog: &Catalog,
        table: &str,
        alias: &str,
        schema: Schema,
        index: &IndexInfo,
        low: Option<i32>,
        high: Option<i32>,
    ) -> Result<Self, ExecutionError> {
        let index_name = index.name();
        let key_position = schema.index_of(&Attribute::new(alias, index.column.as_str()))?;
        let reader =
            TupleReader::open(catalog.relation_path(table)).with_context(relation_context(table))?;
        let index_reader = IndexReader::open(catalog.index_path(index))
            .map_err(|e| index_error(&index_name, e))?;
        tracing::debug!(
            index = %index_name,
            clustered = index.clustered,
            ?low,
            ?high,
            "index scan opened"
        );
        Ok(Self {
            table: table.to_string(),
            index_name,
            schema,
            reader,
            index: index_reader,
            clustered: index.clustered,
            key_position,
            low,
            high,
            started: false,
            done: false,
        })
    }

    fn above_high(&self, key: i32) -> bool {
        self.high.is_some_and(|high| key > high)
    }

    fn start(&mut self) -> Result<(), ExecutionError> {
        self.started = true;
        let Some(low) = self.low else {
            self.index.reset();
            self.reader.reset();
            return Ok(());
        };
        self.index
            .seek(low)
            .map_err(|e| index_error(&self.index_name, e))?;
        if self.clustered {
            match self
                .index
                .next_rid()
                .map_err(|e| index_error(&self.index_name, e))?
            {
                Some((_, rid)) => self
                    .reader
                    .reset_to(rid)
                    .with_context(relation_context(&self.table))?,
                None => self.done = true,
            }
        }
        Ok(())
    }

    fn next_clustered(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        let Some(values) = self.reader.next().with_context(relation_context(&self.table))? else {
            self.done = true;
            return Ok(None);
        };
        let tuple = to_tuple(&self.table, &self.schema, values)?;
        if self.above_high(tuple.values()[self.key_position]) {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(tuple))
    }

    fn next_unclustered(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        let next = self
            .index
            .next_rid()
            .map_err(|e| index_error(&self.index_name, e))?;
        match next {
            Some((key, rid)) if !self.above_high(key) => {
                let values = self
                    .reader
                    .read_at(rid)
                    .with_context(relation_context(&self.table))?;
                to_tuple(&self.table, &self.schema, values).map(Some)
            }
            _ => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

impl Executor for IndexScanExecutor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.started {
            self.start()?;
        }
        if self.done {
            return Ok(None);
        }
        if self.clustered {
            self.next_clustered()
        } else {
            self.next_unclustered()
        }
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.index.reset();
        self.reader.reset();
        self.started = false;
        self.done = false;
        Ok(())
    }
}
