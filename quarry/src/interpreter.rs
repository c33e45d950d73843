//! Runs a batch of queries against one database.
//!
//! Each query is planned, optimized and executed on its own. A failing query
//! is logged and leaves no output behind; the batch carries on with the next.
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::errors::{ExecutionError, IoContext};
use crate::executor::{write_output, ExecContext, Operator};
use crate::index::build_indexes;
use crate::optimizer::{lower, rewrite, PhysicalPlan};
use crate::parser::{parse_select, split_statements};
use crate::planner::{create_logical_plan, LogicalPlan};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Interpreter {
    settings: Settings,
    catalog: Catalog,
}

impl Interpreter {
    /// Loads the catalog and, when configured, builds the indexes.
    pub fn new(settings: Settings) -> Result<Self, ExecutionError> {
        let catalog = Catalog::load(settings.db_dir(), settings.plan.clone())?;
        if settings.build_indexes {
            let built = build_indexes(&catalog)?;
            tracing::info!(built, "indexes ready");
        }
        Ok(Self { settings, catalog })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn output_path(&self, number: usize) -> PathBuf {
        self.settings.output_dir.join(format!("query{number}"))
    }

    /// Runs every statement of the queries file, numbered from 1.
    pub fn run(&self) -> Result<RunSummary, ExecutionError> {
        let mut summary = RunSummary::default();
        if !self.settings.evaluate_queries {
            return Ok(summary);
        }
        let path = self.settings.queries_path();
        let text = fs::read_to_string(&path).with_context(|| format!("queries {}", path.display()))?;
        fs::create_dir_all(&self.settings.output_dir)
            .with_context(|| format!("output directory {}", self.settings.output_dir.display()))?;
        fs::create_dir_all(&self.settings.temp_dir)
            .with_context(|| format!("temp directory {}", self.settings.temp_dir.display()))?;

        for (i, sql) in split_statements(&text).iter().enumerate() {
            let number = i + 1;
            let started = Instant::now();
            match self.run_query(number, sql) {
                Ok(tuples) => {
                    summary.succeeded += 1;
                    tracing::info!(
                        query = number,
                        tuples,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "query finished"
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    let _ = fs::remove_file(self.output_path(number));
                    tracing::error!(query = number, sql = %sql, error = %err, "query failed");
                }
            }
        }
        Ok(summary)
    }

    /// Plans `sql` up to the physical plan.
    pub fn explain(&self, sql: &str) -> Result<(LogicalPlan, PhysicalPlan), ExecutionError> {
        let statement = parse_select(sql)?;
        let logical = rewrite(create_logical_plan(&statement, &self.catalog)?, &self.catalog)?;
        let physical = lower(logical.clone(), &self.catalog)?;
        Ok((logical, physical))
    }

    /// Runs one query and writes its result to `query<number>`.
    pub fn run_query(&self, number: usize, sql: &str) -> Result<u64, ExecutionError> {
        let (logical, physical) = self.explain(sql)?;
        if self.settings.write_plans {
            let plans = [("logicalplan", logical.to_string()), ("physicalplan", physical.to_string())];
            for (kind, text) in plans {
                let path = self.settings.output_dir.join(format!("query{number}_{kind}"));
                fs::write(&path, text).with_context(|| format!("plan {}", path.display()))?;
            }
        }

        let scratch = tempfile::Builder::new()
            .prefix(&format!("query{number}-"))
            .tempdir_in(&self.settings.temp_dir)
            .with_context(|| format!("temp directory {}", self.settings.temp_dir.display()))?;
        let ctx = ExecContext {
            catalog: &self.catalog,
            scratch: scratch.path(),
        };
        let mut root = Operator::build(&physical, &ctx)?;
        tracing::debug!(query = number, "operators built");
        write_output(&mut root, &self.output_path(number))
    }
}
