//! Run configuration, read from a TOML file.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ExecutionError, IoContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinAlgorithm {
    Tnlj,
    #[default]
    Bnlj,
    Smj,
}

impl fmt::Display for JoinAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinAlgorithm::Tnlj => "TNLJ",
            JoinAlgorithm::Bnlj => "BNLJ",
            JoinAlgorithm::Smj => "SMJ",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortAlgorithm {
    #[default]
    InMemory,
    External,
}

/// Physical planning choices shared by every query of a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlanConfig {
    pub join: JoinAlgorithm,
    pub join_buffer_pages: usize,
    pub sort: SortAlgorithm,
    pub sort_buffer_pages: usize,
    pub use_indexes: bool,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            join: JoinAlgorithm::default(),
            join_buffer_pages: 5,
            sort: SortAlgorithm::default(),
            sort_buffer_pages: 3,
            use_indexes: true,
        }
    }
}

impl PlanConfig {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.join_buffer_pages < 1 {
            return Err(ExecutionError::ConfigError(
                "join_buffer_pages must be at least 1".to_string(),
            ));
        }
        if self.sort == SortAlgorithm::External && self.sort_buffer_pages < 3 {
            return Err(ExecutionError::ConfigError(format!(
                "external sort needs at least 3 buffer pages, got {}",
                self.sort_buffer_pages
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub build_indexes: bool,
    pub evaluate_queries: bool,
    pub write_plans: bool,
    pub plan: PlanConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            temp_dir: PathBuf::from("temp"),
            build_indexes: true,
            evaluate_queries: true,
            write_plans: true,
            plan: PlanConfig::default(),
        }
    }
}

impl Settings {
    /// Reads a settings file. Relative directories are taken relative to the
    /// directory holding the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExecutionError> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("config {}", path.display()))?;
        let mut settings = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            settings.resolve_relative_to(base);
        }
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self, ExecutionError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| ExecutionError::ConfigError(e.to_string()))?;
        settings.plan.validate()?;
        Ok(settings)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for dir in [&mut self.input_dir, &mut self.output_dir, &mut self.temp_dir] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    pub fn db_dir(&self) -> PathBuf {
        self.input_dir.join("db")
    }

    pub fn queries_path(&self) -> PathBuf {
        self.input_dir.join("queries.sql")
    }
}
