//! Compare command handlers

use anyhow::{Context, Result};
use colored::*;
use std::path::Path;
use std::time::Instant;

use super::{CompareCommands, DataArgs, DisplayStyle, SchemaArgs};
use crate::cli::Session;
use crate::compare::{
    Comparator, DataComparisonResult, DataDiffOptions, DiffExporter, DiffRecord, DiffStatus, SchemaDiffEntry,
    SchemaDiffStats,
};

/// Rows listed per table in verbose output
const ROW_PREVIEW_LIMIT: usize = 20;

pub async fn handle_compare_command(session: &Session, command: CompareCommands) -> Result<()> {
    match command {
        CompareCommands::Schema(args) => handle_schema(session, args).await,
        CompareCommands::Data(args) => handle_data(session, args).await,
    }
}

async fn handle_schema(session: &Session, args: SchemaArgs) -> Result<()> {
    let (source, target) = session.pair(&args.source, &args.target)?;
    println!(
        "Comparing schema {} → {}",
        args.source.bright_green().bold(),
        args.target.bright_green().bold()
    );

    let start = Instant::now();
    let comparator = Comparator::new(source, target, &session.resilience());
    let entries = comparator
        .compare_schemas()
        .await
        .context("Schema comparison failed")?;
    let elapsed = start.elapsed();

    println!();
    for entry in &entries {
        if entry.status == DiffStatus::Match && args.style == DisplayStyle::Compact {
            continue;
        }
        print_schema_entry(entry, args.style);
    }

    let stats = SchemaDiffStats::from_entries(&entries);
    println!();
    println!(
        "{} objects: {} matching, {} added, {} removed, {} modified, {} errors ({:.2}ms)",
        stats.total,
        stats.matching.to_string().green(),
        stats.added.to_string().green(),
        stats.removed.to_string().red(),
        stats.modified.to_string().yellow(),
        stats.errors.to_string().bright_red(),
        elapsed.as_secs_f64() * 1000.0
    );
    if !stats.has_changes() && stats.errors == 0 {
        println!("{}", "Schemas are identical".green().bold());
    }

    if let Some(path) = args.output {
        let records: Vec<DiffRecord> = entries.iter().map(DiffRecord::from).collect();
        export(&records, &path)?;
    }

    Ok(())
}

async fn handle_data(session: &Session, args: DataArgs) -> Result<()> {
    let (source, target) = session.pair(&args.source, &args.target)?;
    let options = DataDiffOptions {
        counts_only: args.counts_only || session.config.compare.counts_only,
    };
    let comparator = Comparator::new(source, target, &session.resilience());

    let start = Instant::now();
    let results = match &args.table {
        Some(table) => vec![comparator.compare_table_data(table, options).await],
        None => comparator
            .compare_all_tables(options)
            .await
            .context("Data comparison failed")?,
    };
    let elapsed = start.elapsed();

    for result in &results {
        if result.status() == DiffStatus::Match && args.style == DisplayStyle::Compact && args.table.is_none() {
            continue;
        }
        print_data_result(result, args.style);
    }

    let differing = results.iter().filter(|r| r.has_differences()).count();
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    println!();
    println!(
        "{} tables compared: {} with differences, {} failed ({:.2}ms)",
        results.len(),
        differing.to_string().yellow(),
        failed.to_string().bright_red(),
        elapsed.as_secs_f64() * 1000.0
    );

    if let Some(path) = args.output {
        let records: Vec<DiffRecord> = results.iter().map(DiffRecord::from).collect();
        export(&records, &path)?;
    }

    Ok(())
}

fn print_schema_entry(entry: &SchemaDiffEntry, style: DisplayStyle) {
    println!(
        "{} {:<10} {}",
        paint(entry.status, entry.status.symbol()),
        entry.object.category.label().dimmed(),
        entry.object.name
    );

    if let Some(error) = &entry.error {
        println!("    {}", error.bright_red());
    }
    if style == DisplayStyle::Verbose || entry.changes.len() <= 5 {
        for change in &entry.changes {
            println!("    {}", change.to_string().dimmed());
        }
    } else {
        println!("    {} changes (use --style verbose to list them)", entry.changes.len());
    }
}

fn print_data_result(result: &DataComparisonResult, style: DisplayStyle) {
    let status = result.status();
    println!(
        "{} {} {}",
        paint(status, status.symbol()),
        result.table.bold(),
        format!("(source {} / target {} rows)", result.source_count, result.target_count).dimmed()
    );

    if let Some(error) = &result.error {
        println!("    {}", error.bright_red());
        return;
    }

    println!(
        "    matched {}, added {}, removed {}, modified {}",
        result.matched,
        result.added.to_string().green(),
        result.removed.to_string().red(),
        result.modified.to_string().yellow()
    );

    if style == DisplayStyle::Verbose {
        for row in result.rows.iter().take(ROW_PREVIEW_LIMIT) {
            let columns = if row.changed_columns.is_empty() {
                String::new()
            } else {
                format!(" [{}]", row.changed_columns.join(", "))
            };
            println!("    {} {}{}", paint(row.status, row.status.symbol()), row.key, columns.dimmed());
        }
        if result.rows.len() > ROW_PREVIEW_LIMIT {
            println!("    … {} more rows", result.rows.len() - ROW_PREVIEW_LIMIT);
        }
    }
}

fn paint(status: DiffStatus, text: &str) -> ColoredString {
    match status {
        DiffStatus::Match => text.green(),
        DiffStatus::Added => text.bright_green().bold(),
        DiffStatus::Removed => text.red().bold(),
        DiffStatus::Modified => text.yellow().bold(),
        DiffStatus::Error => text.bright_red().bold(),
    }
}

fn export(records: &[DiffRecord], path: &Path) -> Result<()> {
    DiffExporter::write_to_file(records, path)
        .with_context(|| format!("Failed to write output to: {}", path.display()))?;
    println!("Results saved to: {}", path.display().to_string().bright_green());
    Ok(())
}
