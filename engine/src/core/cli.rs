use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_CACHE_MAX_ENTRIES, ENV_CONFIG, ENV_DIALECT, ENV_ENABLE_SUBQUERY_FILTERS,
    ENV_ENABLE_WINDOW_FILTERS, ENV_MAX_FILTER_CLAUSES, ENV_MAX_FILTER_DEPTH, ENV_MAX_PER_PAGE,
    ENV_MAX_PROPERTY_ORDERING_RESULTS, ENV_MAX_REGEX_LENGTH, ENV_REJECT_UNSAFE_REGEX,
};
use crate::sql::Backend;

#[derive(Parser)]
#[command(name = "querygate")]
#[command(version, about = "Nested filter compiler and query security gate", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Maximum filter nesting depth
    #[arg(long, global = true, env = ENV_MAX_FILTER_DEPTH)]
    pub max_filter_depth: Option<usize>,

    /// Maximum number of leaf clauses per filter
    #[arg(long, global = true, env = ENV_MAX_FILTER_CLAUSES)]
    pub max_filter_clauses: Option<usize>,

    /// Maximum regex pattern length
    #[arg(long, global = true, env = ENV_MAX_REGEX_LENGTH)]
    pub max_regex_length: Option<usize>,

    /// Reject regex patterns with catastrophic backtracking shapes
    #[arg(long, global = true, env = ENV_REJECT_UNSAFE_REGEX)]
    pub reject_unsafe_regex: Option<bool>,

    /// Enable window function filters
    #[arg(long, global = true, env = ENV_ENABLE_WINDOW_FILTERS)]
    pub enable_window_filters: Option<bool>,

    /// Enable subquery and exists filters
    #[arg(long, global = true, env = ENV_ENABLE_SUBQUERY_FILTERS)]
    pub enable_subquery_filters: Option<bool>,

    /// Row cap for in-memory property ordering
    #[arg(long, global = true, env = ENV_MAX_PROPERTY_ORDERING_RESULTS)]
    pub max_property_ordering_results: Option<usize>,

    /// Maximum page size
    #[arg(long, global = true, env = ENV_MAX_PER_PAGE)]
    pub max_per_page: Option<u64>,

    /// Descriptor cache capacity
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES)]
    pub cache_max_entries: Option<u64>,

    /// SQL dialect for `compile` output (duckdb or postgres)
    #[arg(long, global = true, env = ENV_DIALECT, value_parser = parse_backend)]
    pub dialect: Option<Backend>,
}

/// Parse SQL dialect from CLI/env string
fn parse_backend(s: &str) -> Result<Backend, String> {
    match s.to_lowercase().as_str() {
        "duckdb" => Ok(Backend::Duckdb),
        "postgres" | "postgresql" => Ok(Backend::Postgres),
        _ => Err(format!(
            "Invalid dialect '{}'. Valid options: duckdb, postgres",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Compile a request to SQL and print the statements with their parameters
    Compile {
        /// Schema file (JSON)
        #[arg(long, short = 's')]
        schema: PathBuf,
        /// Request file (JSON), `-` reads stdin
        #[arg(long, short = 'r')]
        request: PathBuf,
        /// Saved filters file (JSON array)
        #[arg(long)]
        saved_filters: Option<PathBuf>,
        /// Viewer id for saved-filter visibility
        #[arg(long)]
        viewer: Option<String>,
    },
    /// Execute a request against a DuckDB database and print rows as JSON
    Run {
        /// Schema file (JSON)
        #[arg(long, short = 's')]
        schema: PathBuf,
        /// Request file (JSON), `-` reads stdin
        #[arg(long, short = 'r')]
        request: PathBuf,
        /// DuckDB database file; in-memory when omitted
        #[arg(long, short = 'd')]
        database: Option<PathBuf>,
        /// SQL script executed before the query (fixtures)
        #[arg(long)]
        init_sql: Option<PathBuf>,
        /// Saved filters file (JSON array)
        #[arg(long)]
        saved_filters: Option<PathBuf>,
        /// Viewer id for saved-filter visibility
        #[arg(long)]
        viewer: Option<String>,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub max_filter_depth: Option<usize>,
    pub max_filter_clauses: Option<usize>,
    pub max_regex_length: Option<usize>,
    pub reject_unsafe_regex: Option<bool>,
    pub enable_window_filters: Option<bool>,
    pub enable_subquery_filters: Option<bool>,
    pub max_property_ordering_results: Option<usize>,
    pub max_per_page: Option<u64>,
    pub cache_max_entries: Option<u64>,
    pub dialect: Option<Backend>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Commands) {
    let cli = Cli::parse();
    let config = CliConfig {
        config: cli.config,
        max_filter_depth: cli.max_filter_depth,
        max_filter_clauses: cli.max_filter_clauses,
        max_regex_length: cli.max_regex_length,
        reject_unsafe_regex: cli.reject_unsafe_regex,
        enable_window_filters: cli.enable_window_filters,
        enable_subquery_filters: cli.enable_subquery_filters,
        max_property_ordering_results: cli.max_property_ordering_results,
        max_per_page: cli.max_per_page,
        cache_max_entries: cli.cache_max_entries,
        dialect: cli.dialect,
    };
    (config, cli.command)
}
