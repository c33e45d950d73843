//! The main entry point for the quarry query engine.
//!
//! This file parses command-line arguments and dispatches to the interpreter.
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cobble::relation::TupleReader;
use quarry::config::Settings;
use quarry::errors::{ExecutionError, IoContext};
use quarry::interpreter::Interpreter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(version, about = "A teaching relational query engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the indexes and run every query of the input directory
    Run {
        #[arg(default_value = "quarry.toml")]
        config: PathBuf,
    },
    /// Print the logical and physical plan of one query
    Explain { config: PathBuf, sql: String },
    /// Print a relation file, one comma separated tuple per line
    Dump { file: PathBuf },
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

fn dump(file: &Path) -> Result<(), ExecutionError> {
    let context = || format!("relation {}", file.display());
    let mut reader = TupleReader::open(file).with_context(context)?;
    while let Some(values) = reader.next().with_context(context)? {
        let line: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        println!("{}", line.join(","));
    }
    Ok(())
}

fn execute(command: Command) -> Result<(), ExecutionError> {
    match command {
        Command::Run { config } => {
            let interpreter = Interpreter::new(Settings::load(&config)?)?;
            let summary = interpreter.run()?;
            tracing::info!(succeeded = summary.succeeded, failed = summary.failed, "batch finished");
        }
        Command::Explain { config, sql } => {
            let mut settings = Settings::load(&config)?;
            settings.build_indexes = false;
            let interpreter = Interpreter::new(settings)?;
            let (logical, physical) = interpreter.explain(&sql)?;
            print!("{logical}");
            println!();
            print!("{physical}");
        }
        Command::Dump { file } => dump(&file)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    install_tracing_subscriber();
    let cli = Cli::parse();
    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "quarry failed");
            ExitCode::FAILURE
        }
    }
}
