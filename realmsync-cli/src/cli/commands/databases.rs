//! `realmsync databases`

use anyhow::Result;
use colored::*;

use crate::config::Config;

/// List configured databases without opening them
pub fn handle_databases_command(config: &Config) -> Result<()> {
    if config.databases.is_empty() {
        println!(
            "{}",
            "No databases configured. Add a [databases] section to the config file.".yellow()
        );
        println!("Config path: {}", crate::config::default_path().display());
        return Ok(());
    }

    println!("{}", "Databases:".bold());
    for (name, url) in &config.databases {
        println!("  {} {}", name.bright_green().bold(), url.dimmed());
    }
    Ok(())
}
