//! Promote command handler

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::fs;
use std::path::Path;

use super::PromoteArgs;
use crate::cli::Session;
use crate::promote::{
    CancellationHandle, IdMapping, PipelineFailure, PipelineOrchestrator, PipelineProgress, PipelineRun,
    PromotionError, PromotionOutcome, PromotionRequest, Resolution, StatementOutcome, SyncLogEntry,
};
use crate::types::ContentProject;

#[derive(Serialize)]
struct PromotionReport<'a> {
    run: &'a PipelineRun,
    mappings: &'a [IdMapping],
    log: &'a [SyncLogEntry],
    error: Option<String>,
}

pub async fn handle_promote_command(session: &Session, args: PromoteArgs) -> Result<()> {
    let project = ContentProject::load(&args.project)?;
    let target = session.target(&args.target)?;

    let request = PromotionRequest {
        workspace: args.workspace.clone().unwrap_or_else(|| args.target.clone()),
        project,
        dry_run: args.dry_run,
    };

    println!(
        "Promoting {} into {}{}",
        request.project.name.bright_cyan().bold(),
        args.target.bright_green().bold(),
        if args.dry_run { " (dry run)".yellow().to_string() } else { String::new() }
    );

    let mut orchestrator = PipelineOrchestrator::new(session.layout.clone(), session.locks.clone());
    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_progress(&event);
        }
    });

    let cancel = CancellationHandle::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "Interrupt received, stopping after the current step".yellow());
                cancel.cancel();
            }
        })
    };

    let result = orchestrator.run(request, &target, &cancel).await;

    interrupt.abort();
    // Closing the channel ends the printer
    drop(orchestrator);
    if let Err(e) = printer.await {
        log::debug!("Progress printer ended abnormally: {}", e);
    }

    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            if let Some(path) = &args.script_out {
                write_file(path, &outcome.script.render())?;
            }
            if let Some(path) = &args.report {
                let report = PromotionReport {
                    run: &outcome.run,
                    mappings: &outcome.mappings,
                    log: &outcome.log,
                    error: None,
                };
                write_file(path, &serde_json::to_string_pretty(&report)?)?;
            }
            Ok(())
        }
        Err(failure) => {
            print_failure(&failure);
            if let Some(path) = &args.report {
                let log = failure.error.apply_result().map(|r| r.log.as_slice()).unwrap_or(&[]);
                let report = PromotionReport {
                    run: &failure.run,
                    mappings: &[],
                    log,
                    error: Some(failure.error.to_string()),
                };
                write_file(path, &serde_json::to_string_pretty(&report)?)?;
            }
            Err(failure.into())
        }
    }
}

fn print_progress(event: &PipelineProgress) {
    println!(
        "{} {:<24} {}",
        format!("[{:>3.0}%]", event.overall * 100.0).dimmed(),
        event.stage.label().cyan(),
        event.message
    );
}

fn print_outcome(outcome: &PromotionOutcome) {
    println!();
    let allocated = outcome
        .mappings
        .iter()
        .filter(|m| m.resolution == Resolution::Allocated)
        .count();
    println!(
        "{} entities: {} matched, {} allocated",
        outcome.mappings.len(),
        outcome.mappings.len() - allocated,
        allocated
    );
    for mapping in outcome.mappings.iter().filter(|m| m.resolution == Resolution::Allocated) {
        println!(
            "  {} {}:{} {} → {}",
            "+".green(),
            mapping.entity_type,
            mapping.natural_key,
            mapping.source_id.to_string().dimmed(),
            mapping.target_id.to_string().bright_green()
        );
    }

    match &outcome.apply {
        None => {
            println!();
            println!("{}", outcome.script.render());
        }
        Some(apply) => {
            println!(
                "{} {} statements committed",
                "✓".green().bold(),
                apply.applied.to_string().bold()
            );
        }
    }
}

fn print_failure(failure: &PipelineFailure) {
    println!();
    println!(
        "{} {}",
        "✗".bright_red().bold(),
        format!("Promotion failed while {}", failure.failed_at).bright_red().bold()
    );

    match &failure.error {
        PromotionError::Validation(err) => {
            for issue in &err.issues {
                println!("  {} {}", "-".red(), issue);
            }
        }
        PromotionError::Cycle(err) => {
            let chain: Vec<String> = err.chain.iter().map(|k| k.to_string()).collect();
            println!("  {}", chain.join(" → ").yellow());
        }
        PromotionError::Execution { result } => {
            for entry in &result.log {
                let marker = match entry.outcome {
                    StatementOutcome::Success => "✓".green(),
                    StatementOutcome::Failed => "✗".bright_red(),
                    StatementOutcome::Skipped => "·".dimmed(),
                };
                println!(
                    "  {} [{}] {} {} {}",
                    marker,
                    entry.index,
                    entry.verb.label(),
                    entry.table,
                    entry.entity.to_string().dimmed()
                );
                if let Some(error) = &entry.error {
                    println!("      {}", error.bright_red());
                }
            }
            if result.rolled_back {
                println!("  {}", "Transaction rolled back, target unchanged".yellow());
            }
        }
        other => println!("  {}", other),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Saved {}", path.display().to_string().bright_green());
    Ok(())
}
