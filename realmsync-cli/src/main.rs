use anyhow::Result;
use clap::Parser;

use realmsync::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    cli::run(cli).await
}
