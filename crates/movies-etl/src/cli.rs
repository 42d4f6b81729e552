//! Command line interface of the `movies-etl` binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::kind::EntityKind;

/// movies-etl - incremental extraction of the movies catalog for search indexing
///
/// Polls the movies database for changed film works, persons and genres and
/// writes every record to stdout as one JSON line.
#[derive(Parser, Debug)]
#[command(name = "movies-etl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "movies-etl.yaml", env = "MOVIES_ETL_CONFIG")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Database URL, overrides `postgres.url` from the configuration file
    #[arg(long, env = "MOVIES_ETL_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract changes and write them to stdout as NDJSON
    Run {
        /// Perform a single pass and exit
        #[arg(long)]
        once: bool,

        /// Only extract this kind (filmwork, person, genre)
        #[arg(long)]
        kind: Option<EntityKind>,
    },

    /// Validate the configuration and probe the database
    Check,

    /// Inspect or reset watermarks
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
}

/// Watermark commands
#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Print every saved watermark
    Show,

    /// Reset one watermark, or all of them when no key is given
    Reset {
        /// Stream key, e.g. `filmwork` or `person_related`
        key: Option<String>,
    },
}

impl Cli {
    /// Kinds a `run` pass extracts
    pub fn kinds(kind: Option<EntityKind>) -> Vec<EntityKind> {
        match kind {
            Some(kind) => vec![kind],
            None => EntityKind::ALL.to_vec(),
        }
    }
}
