#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use cobble::relation::{read_all, write_all};
use quarry::config::{PlanConfig, Settings};
use quarry::interpreter::Interpreter;
use tempfile::{tempdir, TempDir};

/// A database laid out the way `quarry run` expects it, inside a temporary
/// directory that is removed when the value is dropped.
pub struct TestDb {
    dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempdir().unwrap();
        for sub in ["input/db/data", "output", "temp"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        fs::write(dir.path().join("input/db/schema.txt"), "").unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root().join("input/db")
    }

    /// Declares `name` in schema.txt and writes its relation file.
    pub fn table(&self, name: &str, columns: &[&str], rows: &[Vec<i32>]) -> &Self {
        let schema = self.db_dir().join("schema.txt");
        let mut text = fs::read_to_string(&schema).unwrap();
        text.push_str(&format!("{name} {}\n", columns.join(" ")));
        fs::write(&schema, text).unwrap();
        write_all(self.db_dir().join("data").join(name), rows).unwrap();
        self
    }

    pub fn index(&self, table: &str, column: &str, clustered: bool, order: u32) -> &Self {
        let path = self.db_dir().join("index_info.txt");
        let mut text = fs::read_to_string(&path).unwrap_or_default();
        text.push_str(&format!("{table} {column} {} {order}\n", u8::from(clustered)));
        fs::write(&path, text).unwrap();
        self
    }

    pub fn queries(&self, sql: &str) -> &Self {
        fs::write(self.root().join("input/queries.sql"), sql).unwrap();
        self
    }

    pub fn settings(&self, plan: PlanConfig) -> Settings {
        Settings {
            input_dir: self.root().join("input"),
            output_dir: self.root().join("output"),
            temp_dir: self.root().join("temp"),
            plan,
            ..Settings::default()
        }
    }

    pub fn interpreter(&self, plan: PlanConfig) -> Interpreter {
        Interpreter::new(self.settings(plan)).unwrap()
    }

    pub fn output(&self, number: usize) -> Vec<Vec<i32>> {
        read_all(self.root().join("output").join(format!("query{number}"))).unwrap()
    }

    pub fn has_output(&self, number: usize) -> bool {
        self.root().join("output").join(format!("query{number}")).exists()
    }

    /// Entries left in the temp directory.
    pub fn temp_entries(&self) -> usize {
        fs::read_dir(self.root().join("temp"))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}

/// Boats, Sailors and Reserves with a handful of rows each.
pub fn sailors_db() -> TestDb {
    let db = TestDb::new();
    db.table(
        "Boats",
        &["D", "E", "F"],
        &[vec![12, 143, 196], vec![30, 63, 101], vec![57, 24, 130]],
    )
    .table(
        "Sailors",
        &["A", "B", "C"],
        &[
            vec![1, 200, 50],
            vec![2, 200, 200],
            vec![3, 100, 105],
            vec![4, 100, 50],
            vec![5, 100, 500],
            vec![6, 300, 400],
        ],
    )
    .table(
        "Reserves",
        &["G", "H"],
        &[
            vec![1, 101],
            vec![1, 102],
            vec![1, 103],
            vec![2, 101],
            vec![3, 102],
            vec![4, 104],
        ],
    );
    db
}

pub fn plan(join: quarry::config::JoinAlgorithm) -> PlanConfig {
    PlanConfig {
        join,
        ..PlanConfig::default()
    }
}

pub fn sorted(mut rows: Vec<Vec<i32>>) -> Vec<Vec<i32>> {
    rows.sort();
    rows
}
