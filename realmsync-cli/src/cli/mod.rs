//! Command line surface of the `realmsync` binary

pub mod commands;
pub mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::compare::CompareCommands;
use commands::promote::PromoteArgs;
pub use session::Session;

#[derive(Parser)]
#[command(name = "realmsync")]
#[command(version)]
#[command(about = "Compare game databases and promote content between them")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to $REALMSYNC_CONFIG, then ~/.config/realmsync/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the databases declared in the config
    Databases,

    /// Compare schema or data between two databases
    #[command(subcommand)]
    Compare(CompareCommands),

    /// Promote a content project into a target database
    Promote(PromoteArgs),
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = crate::config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Databases => commands::databases::handle_databases_command(&config),
        Commands::Compare(args) => {
            let session = Session::open(config).await?;
            commands::compare::handler::handle_compare_command(&session, args).await
        }
        Commands::Promote(args) => {
            let session = Session::open(config).await?;
            commands::promote::handler::handle_promote_command(&session, args).await
        }
    }
}
