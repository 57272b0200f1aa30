//! `realmsync compare schema|data`

pub mod handler;

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum CompareCommands {
    /// Compare tables, views, indexes, triggers and constraints
    Schema(SchemaArgs),

    /// Compare table rows by primary key
    Data(DataArgs),
}

#[derive(Args)]
pub struct SchemaArgs {
    /// Source database name
    #[arg(long, short)]
    pub source: String,

    /// Target database name
    #[arg(long, short)]
    pub target: String,

    /// Export the diff to a .json or .csv file
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "compact")]
    pub style: DisplayStyle,
}

#[derive(Args)]
pub struct DataArgs {
    /// Source database name
    #[arg(long, short)]
    pub source: String,

    /// Target database name
    #[arg(long, short)]
    pub target: String,

    /// Table to compare
    #[arg(long, required_unless_present = "all", conflicts_with = "all")]
    pub table: Option<String>,

    /// Compare every table present on either side
    #[arg(long)]
    pub all: bool,

    /// Only count differences, do not list rows
    #[arg(long)]
    pub counts_only: bool,

    /// Export the diff to a .json or .csv file
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "compact")]
    pub style: DisplayStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DisplayStyle {
    /// Differences only
    Compact,
    /// Every object, with change details
    Verbose,
}
