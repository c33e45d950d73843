//! In-memory and external sorting.
//!
//! Both sorts order by the requested key columns first and then by every other
//! column in schema order, so their outputs are identical.
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::path::{Path, PathBuf};

use cobble::page::tuples_per_page;
use cobble::relation::{write_all, TupleReader, TupleWriter};
use cobble::Rid;
use tempfile::TempDir;

use super::{Executor, Operator};
use crate::errors::{ExecutionError, IoContext};
use crate::types::{Attribute, Schema, Tuple};

/// Column positions in comparison order: `order_by`, then the rest.
pub(crate) fn sort_order(schema: &Schema, order_by: &[Attribute]) -> Result<Vec<usize>, ExecutionError> {
    let mut order = Vec::with_capacity(schema.len());
    for attribute in order_by {
        let position = schema.index_of(attribute)?;
        if !order.contains(&position) {
            order.push(position);
        }
    }
    for position in 0..schema.len() {
        if !order.contains(&position) {
            order.push(position);
        }
    }
    Ok(order)
}

fn compare(order: &[usize], a: &[i32], b: &[i32]) -> Ordering {
    order.iter().map(|&i| a[i]).cmp(order.iter().map(|&i| b[i]))
}

fn sort_key(order: &[usize], values: &[i32]) -> Vec<i32> {
    order.iter().map(|&i| values[i]).collect()
}

/// Drains its input on the first pull and returns the tuples by position.
pub struct SortExecutor {
    input: Box<Operator>,
    order: Vec<usize>,
    tuples: Vec<Tuple>,
    loaded: bool,
    cursor: usize,
}

impl SortExecutor {
    pub fn new(input: Box<Operator>, order_by: &[Attribute]) -> Result<Self, ExecutionError> {
        let order = sort_order(input.schema(), order_by)?;
        Ok(Self {
            input,
            order,
            tuples: Vec::new(),
            loaded: false,
            cursor: 0,
        })
    }

    fn load(&mut self) -> Result<(), ExecutionError> {
        while let Some(tuple) = self.input.next()? {
            self.tuples.push(tuple);
        }
        let order = &self.order;
        self.tuples
            .sort_by(|a, b| compare(order, a.values(), b.values()));
        self.loaded = true;
        Ok(())
    }
}

impl Executor for SortExecutor {
    fn schema(&self) -> &Schema {
        self.input.schema()
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.loaded {
            self.load()?;
        }
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
        if !self.loaded {
            self.load()?;
        }
        self.cursor = index;
        Ok(())
    }
}

/// Sorts with a budget of `buffer_pages` pages: sorted runs of that many
/// pages are merged `buffer_pages - 1` at a time until one run is left, which
/// is then read back.
pub struct ExternalSortExecutor {
    input: Box<Operator>,
    order: Vec<usize>,
    buffer_pages: usize,
    scratch: PathBuf,
    tuples_per_page: usize,
    workspace: Option<TempDir>,
    output: Option<TupleReader>,
}

impl ExternalSortExecutor {
    pub fn new(
        input: Box<Operator>,
        order_by: &[Attribute],
        buffer_pages: usize,
        scratch: &Path,
    ) -> Result<Self, ExecutionError> {
        let order = sort_order(input.schema(), order_by)?;
        let tuples_per_page = tuples_per_page(input.schema().len());
        Ok(Self {
            input,
            order,
            buffer_pages: buffer_pages.max(3),
            scratch: scratch.to_path_buf(),
            tuples_per_page,
            workspace: None,
            output: None,
        })
    }

    fn run_path(workspace: &TempDir, pass: usize, run: usize) -> PathBuf {
        workspace.path().join(format!("pass{pass}-run{run}"))
    }

    fn materialize(&mut self) -> Result<(), ExecutionError> {
        let workspace = tempfile::Builder::new()
            .prefix("sort")
            .tempdir_in(&self.scratch)
            .with_context(|| format!("sort directory in {}", self.scratch.display()))?;
        let context = || format!("sort runs in {}", workspace.path().display());

        let run_capacity = self.buffer_pages * self.tuples_per_page;
        let mut runs = Vec::new();
        let mut exhausted = false;
        while !exhausted {
            let mut buffer: Vec<Vec<i32>> = Vec::with_capacity(run_capacity);
            while buffer.len() < run_capacity {
                match self.input.next()? {
                    Some(tuple) => buffer.push(tuple.into_values()),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if buffer.is_empty() {
                break;
            }
            let order = &self.order;
            buffer.sort_by(|a, b| compare(order, a, b));
            let path = Self::run_path(&workspace, 0, runs.len());
            write_all(&path, &buffer).with_context(context)?;
            runs.push(path);
        }
        tracing::debug!(runs = runs.len(), run_capacity, "sorted runs written");

        let fan_in = self.buffer_pages - 1;
        let mut pass = 1;
        while runs.len() > 1 {
            let mut merged = Vec::with_capacity(runs.len().div_ceil(fan_in));
            for group in runs.chunks(fan_in) {
                let path = Self::run_path(&workspace, pass, merged.len());
                merge_runs(&self.order, group, &path).with_context(context)?;
                for run in group {
                    std::fs::remove_file(run).with_context(context)?;
                }
                merged.push(path);
            }
            tracing::debug!(pass, runs = merged.len(), "merge pass finished");
            runs = merged;
            pass += 1;
        }

        let sorted = match runs.pop() {
            Some(path) => path,
            None => {
                let path = Self::run_path(&workspace, 0, 0);
                write_all(&path, &[]).with_context(context)?;
                path
            }
        };
        let output = TupleReader::open(&sorted).with_context(context)?;
        self.output = Some(output);
        self.workspace = Some(workspace);
        Ok(())
    }

    fn output(&mut self) -> Result<&mut TupleReader, ExecutionError> {
        if self.output.is_none() {
            self.materialize()?;
        }
        self.output.as_mut().ok_or_else(|| {
            ExecutionError::PlanningError("external sort produced no output".to_string())
        })
    }
}

fn merge_runs(order: &[usize], runs: &[PathBuf], path: &Path) -> io::Result<()> {
    let mut readers = runs
        .iter()
        .map(TupleReader::open)
        .collect::<io::Result<Vec<_>>>()?;
    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (run, reader) in readers.iter_mut().enumerate() {
        if let Some(values) = reader.next()? {
            heap.push(Reverse((sort_key(order, &values), run, values)));
        }
    }
    let mut writer = TupleWriter::create(path)?;
    while let Some(Reverse((_, run, values))) = heap.pop() {
        writer.write(&values)?;
        if let Some(next) = readers[run].next()? {
            heap.push(Reverse((sort_key(order, &next), run, next)));
        }
    }
    writer.finish()?;
    Ok(())
}

impl Executor for ExternalSortExecutor {
    fn schema(&self) -> &Schema {
        self.input.schema()
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        let values = self.output()?.next().context("sorted output")?;
        Ok(values.map(|values| Tuple::new(self.input.schema().clone(), values)))
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        if let Some(output) = self.output.as_mut() {
            output.reset();
        }
        Ok(())
    }

    fn reset_to(&mut self, index: usize) -> Result<(), ExecutionError> {
        let tuples_per_page = self.tuples_per_page;
        let rid = Rid::new(
            (index / tuples_per_page) as u32,
            (index % tuples_per_page) as u32,
        );
        self.output()?.reset_to(rid).context("sorted output")
    }
}
