//! `realmsync promote`

pub mod handler;

use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct PromoteArgs {
    /// Content project JSON exported by the editor
    #[arg(long, short)]
    pub project: PathBuf,

    /// Target database name
    #[arg(long, short)]
    pub target: String,

    /// Workspace lock name (defaults to the target name)
    #[arg(long)]
    pub workspace: Option<String>,

    /// Generate the script without executing it
    #[arg(long)]
    pub dry_run: bool,

    /// Write the generated SQL script to a file
    #[arg(long)]
    pub script_out: Option<PathBuf>,

    /// Write the id mappings and execution log as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}
