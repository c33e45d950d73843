//! Table schemas, statistics and index declarations of a database directory.
//!
//! ```text
//! <db>/schema.txt         Sailors A B C
//! <db>/index_info.txt     Sailors A 1 10      (table column clustered order)
//! <db>/data/<Table>       relation files
//! <db>/indexes/<T>.<c>    index files
//! <db>/stats.txt          Sailors 1000 A,0,99 B,3,7 ...
//! ```
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cobble::relation::TupleReader;

use crate::config::PlanConfig;
use crate::errors::{ExecutionError, IoContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub table: String,
    pub column: String,
    pub clustered: bool,
    pub order: u32,
}

impl IndexInfo {
    pub fn name(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnStats {
    pub min: i32,
    pub max: i32,
}

impl ColumnStats {
    /// Number of integers in `[min, max]`.
    pub fn domain(&self) -> f64 {
        (self.max as f64 - self.min as f64 + 1.0).max(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableStats {
    pub rows: u64,
    pub pages: u32,
    /// One entry per column, in schema order.
    pub columns: Vec<ColumnStats>,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub stats: TableStats,
    pub indexes: Vec<IndexInfo>,
}

impl TableInfo {
    pub fn column_stats(&self, column: &str) -> Option<ColumnStats> {
        let position = self.columns.iter().position(|c| c == column)?;
        self.stats.columns.get(position).copied()
    }
}

/// A declared relation that could not be scanned when the catalog was built.
#[derive(Debug, Clone)]
struct UnreadableRelation {
    kind: io::ErrorKind,
    message: String,
}

/// Everything the planner and operators look up about the database.
/// Built once per run and passed by reference.
#[derive(Debug, Clone)]
pub struct Catalog {
    db_dir: PathBuf,
    tables: BTreeMap<String, TableInfo>,
    /// Only queries that name one of these fail; the other tables stay usable.
    unreadable: BTreeMap<String, UnreadableRelation>,
    plan: PlanConfig,
}

impl Catalog {
    /// Loads the schema and index declarations of `db_dir`, gathers statistics
    /// by scanning every relation and records them in `stats.txt`.
    pub fn load<P: AsRef<Path>>(db_dir: P, plan: PlanConfig) -> Result<Self, ExecutionError> {
        let db_dir = db_dir.as_ref();
        let schema_path = db_dir.join("schema.txt");
        let schema = fs::read_to_string(&schema_path)
            .with_context(|| format!("schema {}", schema_path.display()))?;
        let tables = parse_schema(&schema)?;

        let index_path = db_dir.join("index_info.txt");
        let indexes = if index_path.exists() {
            let text = fs::read_to_string(&index_path)
                .with_context(|| format!("index info {}", index_path.display()))?;
            parse_index_info(&text)?
        } else {
            Vec::new()
        };

        let catalog = Self::from_parts(db_dir, tables, indexes, plan)?;
        catalog.write_stats()?;
        Ok(catalog)
    }

    fn from_parts(
        db_dir: &Path,
        tables: Vec<(String, Vec<String>)>,
        indexes: Vec<IndexInfo>,
        plan: PlanConfig,
    ) -> Result<Self, ExecutionError> {
        plan.validate()?;
        let mut catalog = Self {
            db_dir: db_dir.to_path_buf(),
            tables: BTreeMap::new(),
            unreadable: BTreeMap::new(),
            plan,
        };
        for (name, columns) in tables {
            let stats = match gather_stats(&catalog.relation_path(&name), &name, columns.len()) {
                Ok(stats) => stats,
                Err(ExecutionError::Io { source, .. }) => {
                    tracing::warn!(table = %name, error = %source, "relation unreadable, queries on it will fail");
                    let relation = UnreadableRelation {
                        kind: source.kind(),
                        message: source.to_string(),
                    };
                    catalog.unreadable.insert(name, relation);
                    continue;
                }
                Err(err) => return Err(err),
            };
            tracing::debug!(table = %name, rows = stats.rows, pages = stats.pages, "statistics gathered");
            catalog.tables.insert(
                name.clone(),
                TableInfo {
                    name,
                    columns,
                    stats,
                    indexes: Vec::new(),
                },
            );
        }
        for index in indexes {
            catalog.add_index(index)?;
        }
        Ok(catalog)
    }

    fn add_index(&mut self, index: IndexInfo) -> Result<(), ExecutionError> {
        if self.unreadable.contains_key(&index.table) {
            tracing::warn!(index = %index.name(), "index on an unreadable relation ignored");
            return Ok(());
        }
        let table = self
            .tables
            .get_mut(&index.table)
            .ok_or_else(|| ExecutionError::TableNotFound(index.table.clone()))?;
        if !table.columns.contains(&index.column) {
            return Err(ExecutionError::ColumnNotFound(index.name()));
        }
        if index.order < 1 {
            return Err(ExecutionError::ConfigError(format!(
                "index {} must have order at least 1",
                index.name()
            )));
        }
        if table.indexes.iter().any(|other| other.column == index.column) {
            return Err(ExecutionError::ConfigError(format!(
                "index {} is declared twice",
                index.name()
            )));
        }
        let clustered_conflict = table
            .indexes
            .iter()
            .any(|other| other.clustered || index.clustered);
        if clustered_conflict {
            return Err(ExecutionError::ConfigError(format!(
                "table {} cannot combine a clustered index with an index on another column ({})",
                index.table,
                index.name()
            )));
        }
        table.indexes.push(index);
        Ok(())
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    pub fn plan(&self) -> &PlanConfig {
        &self.plan
    }

    /// The same catalog planned with different physical choices.
    pub fn with_plan(&self, plan: PlanConfig) -> Result<Catalog, ExecutionError> {
        plan.validate()?;
        Ok(Catalog {
            plan,
            ..self.clone()
        })
    }

    /// Looks up a table. A declared table whose relation could not be read at
    /// load time reports that I/O error.
    pub fn table(&self, name: &str) -> Result<&TableInfo, ExecutionError> {
        if let Some(relation) = self.unreadable.get(name) {
            return Err(ExecutionError::Io {
                context: format!("relation {name}"),
                source: io::Error::new(relation.kind, relation.message.clone()),
            });
        }
        self.tables
            .get(name)
            .ok_or_else(|| ExecutionError::TableNotFound(name.to_string()))
    }

    /// Tables with statistics, in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn relation_path(&self, table: &str) -> PathBuf {
        self.db_dir.join("data").join(table)
    }

    pub fn index_path(&self, index: &IndexInfo) -> PathBuf {
        self.db_dir.join("indexes").join(index.name())
    }

    pub fn write_stats(&self) -> Result<(), ExecutionError> {
        let mut out = String::new();
        for table in self.tables.values() {
            let _ = write!(out, "{} {}", table.name, table.stats.rows);
            for (column, stats) in table.columns.iter().zip(&table.stats.columns) {
                let _ = write!(out, " {},{},{}", column, stats.min, stats.max);
            }
            out.push('\n');
        }
        let path = self.db_dir.join("stats.txt");
        fs::write(&path, out).with_context(|| format!("statistics {}", path.display()))
    }
}

fn parse_schema(text: &str) -> Result<Vec<(String, Vec<String>)>, ExecutionError> {
    let mut tables = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            continue;
        };
        let columns: Vec<String> = words.map(str::to_string).collect();
        if columns.is_empty() {
            return Err(ExecutionError::ConfigError(format!(
                "table {name} declares no columns"
            )));
        }
        tables.push((name.to_string(), columns));
    }
    Ok(tables)
}

fn parse_index_info(text: &str) -> Result<Vec<IndexInfo>, ExecutionError> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            let malformed =
                || ExecutionError::ConfigError(format!("malformed index declaration `{line}`"));
            let [table, column, clustered, order] = words[..] else {
                return Err(malformed());
            };
            let clustered = match clustered {
                "0" => false,
                "1" => true,
                _ => return Err(malformed()),
            };
            Ok(IndexInfo {
                table: table.to_string(),
                column: column.to_string(),
                clustered,
                order: order.parse().map_err(|_| malformed())?,
            })
        })
        .collect()
}

fn gather_stats(path: &Path, table: &str, width: usize) -> Result<TableStats, ExecutionError> {
    let mut reader = TupleReader::open(path).with_context(|| format!("relation {table}"))?;
    let mut stats = TableStats {
        rows: 0,
        pages: reader.num_pages(),
        columns: Vec::with_capacity(width),
    };
    let mut bounds: Vec<(i32, i32)> = vec![(i32::MAX, i32::MIN); width];
    while let Some(values) = reader.next().with_context(|| format!("relation {table}"))? {
        if values.len() != width {
            return Err(ExecutionError::ConfigError(format!(
                "relation {table} stores {} columns but its schema declares {width}",
                values.len()
            )));
        }
        for (bound, value) in bounds.iter_mut().zip(&values) {
            bound.0 = bound.0.min(*value);
            bound.1 = bound.1.max(*value);
        }
        stats.rows += 1;
    }
    stats.columns = bounds
        .into_iter()
        .map(|(min, max)| {
            if min > max {
                ColumnStats { min: 0, max: 0 }
            } else {
                ColumnStats { min, max }
            }
        })
        .collect();
    Ok(stats)
}

/// Assembles a catalog without schema text files, from the relation files
/// under `<db>/data`.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    db_dir: PathBuf,
    tables: Vec<(String, Vec<String>)>,
    indexes: Vec<IndexInfo>,
    plan: PlanConfig,
}

impl CatalogBuilder {
    pub fn new<P: AsRef<Path>>(db_dir: P) -> Self {
        Self {
            db_dir: db_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn table(mut self, name: &str, columns: &[&str]) -> Self {
        self.tables.push((
            name.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        ));
        self
    }

    pub fn index(mut self, table: &str, column: &str, clustered: bool, order: u32) -> Self {
        self.indexes.push(IndexInfo {
            table: table.to_string(),
            column: column.to_string(),
            clustered,
            order,
        });
        self
    }

    pub fn plan(mut self, plan: PlanConfig) -> Self {
        self.plan = plan;
        self
    }

    pub fn build(self) -> Result<Catalog, ExecutionError> {
        Catalog::from_parts(&self.db_dir, self.tables, self.indexes, self.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobble::relation::write_all;
    use tempfile::tempdir;

    fn write_db(db: &Path) {
        write_all(
            db.join("data/Boats"),
            &[vec![12, 143, 196], vec![30, 63, 101], vec![57, 24, 130]],
        )
        .unwrap();
        write_all(db.join("data/Empty"), &[]).unwrap();
        fs::write(db.join("schema.txt"), "Boats D E F\nEmpty X\n").unwrap();
    }

    #[test]
    fn load_gathers_and_writes_stats() {
        let dir = tempdir().unwrap();
        write_db(dir.path());
        fs::write(dir.path().join("index_info.txt"), "Boats E 0 2\n").unwrap();

        let catalog = Catalog::load(dir.path(), PlanConfig::default()).unwrap();
        let boats = catalog.table("Boats").unwrap();
        assert_eq!(boats.stats.rows, 3);
        assert_eq!(boats.stats.pages, 1);
        assert_eq!(boats.column_stats("E"), Some(ColumnStats { min: 24, max: 143 }));
        assert_eq!(boats.indexes.len(), 1);
        assert_eq!(catalog.table("Empty").unwrap().stats.rows, 0);

        let stats = fs::read_to_string(dir.path().join("stats.txt")).unwrap();
        assert_eq!(stats, "Boats 3 D,12,57 E,24,143 F,101,196\nEmpty 0 X,0,0\n");
        assert!(matches!(catalog.table("Nope"), Err(ExecutionError::TableNotFound(_))));
    }

    #[test]
    fn rejects_clustered_index_beside_another() {
        let dir = tempdir().unwrap();
        write_db(dir.path());
        let result = CatalogBuilder::new(dir.path())
            .table("Boats", &["D", "E", "F"])
            .index("Boats", "D", true, 2)
            .index("Boats", "E", false, 2)
            .build();
        assert!(matches!(result, Err(ExecutionError::ConfigError(_))));

        let result = CatalogBuilder::new(dir.path())
            .table("Boats", &["D", "E", "F"])
            .index("Boats", "D", false, 2)
            .index("Boats", "E", false, 2)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_unknown_index_targets() {
        let dir = tempdir().unwrap();
        write_db(dir.path());
        let builder = || CatalogBuilder::new(dir.path()).table("Boats", &["D", "E", "F"]);
        assert!(matches!(
            builder().index("Boats", "Q", false, 2).build(),
            Err(ExecutionError::ColumnNotFound(_))
        ));
        assert!(matches!(
            builder().index("Ships", "D", false, 2).build(),
            Err(ExecutionError::TableNotFound(_))
        ));
        assert!(parse_index_info("Boats D maybe 2").is_err());
    }

    #[test]
    fn missing_relation_fails_only_its_own_lookups() {
        let dir = tempdir().unwrap();
        write_db(dir.path());
        fs::write(dir.path().join("schema.txt"), "Boats D E F\nGhost A B\n").unwrap();
        fs::write(dir.path().join("index_info.txt"), "Ghost A 1 2\n").unwrap();

        let catalog = Catalog::load(dir.path(), PlanConfig::default()).unwrap();
        let err = catalog.table("Ghost").unwrap_err();
        match &err {
            ExecutionError::Io { context, source } => {
                assert_eq!(context, "relation Ghost");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(catalog.table("Boats").unwrap().stats.rows, 3);
        assert_eq!(catalog.tables().count(), 1);
        let stats = fs::read_to_string(dir.path().join("stats.txt")).unwrap();
        assert_eq!(stats, "Boats 3 D,12,57 E,24,143 F,101,196\n");
    }
}
