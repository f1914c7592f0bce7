// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use log::{info, LevelFilter};
use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use xssdynagen::catalog::CharacterCatalog;
use xssdynagen::cli::Cli;
use xssdynagen::errors::ScanError;
use xssdynagen::getstate::GetState;
use xssdynagen::http::{job_progress_bar, HttpFetcher};
use xssdynagen::orchestrator::{BatchOrchestrator, RunSummary, ScanJob, Shutdown};
use xssdynagen::report::{report_paths, Report, ReportFormat, ReportGenerator};
use xssdynagen::targets::{build_jobs, load_url_list, validate_domain_url};

const EXIT_FATAL: u8 = 1;
const EXIT_STARTUP: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    let level = LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Warn);
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();

    if cli.update {
        println!(
            "{} {} is distributed through crates.io. Update with:\n  cargo install {} --force",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_NAME")
        );
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(summary) if summary.interrupted => ExitCode::from(EXIT_INTERRUPTED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Bad input (catalog, configuration, targets) exits with 2, anything else
/// with 1.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<ScanError>() {
        Some(scan_error) if scan_error.is_fatal_at_startup() => EXIT_STARTUP,
        _ => EXIT_FATAL,
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let started = Local::now();
    let config = Arc::new(cli.to_config().context("Invalid configuration")?);
    let catalog = CharacterCatalog::load(cli.char_file.as_deref())
        .context("Failed to load character groups")?;

    let urls = match (&cli.domain, &cli.url_list) {
        (Some(domain), _) => vec![validate_domain_url(domain)?],
        (None, Some(path)) => {
            let list = load_url_list(path)?;
            if list.skipped_without_query > 0 {
                println!(
                    "{}",
                    format!("Skipped: {} URLs without parameters", list.skipped_without_query).yellow()
                );
            }
            list.urls
        }
        (None, None) => anyhow::bail!("either --domain or --url-list is required"),
    };
    let jobs = build_jobs(&urls);

    println!("{}", "Configuration:".cyan());
    println!("- Version: {}", env!("CARGO_PKG_VERSION").yellow());
    println!("- Max connections: {}", config.max_connections().to_string().cyan());
    println!("- Batch size: {}", config.batch_size().to_string().cyan());
    println!("- Timeout: {}s", config.timeout().to_string().cyan());
    println!("- Character groups: {}", catalog.groups().len().to_string().cyan());
    println!(
        "{}",
        format!("Loaded: {} URL(s), {} parameter(s)", urls.len(), jobs.len()).green()
    );

    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{}",
                "Interrupt received, finishing in-flight probes...".yellow()
            );
            signal.trigger();
        }
    });

    let orchestrator = BatchOrchestrator::new(
        Arc::clone(&config),
        &catalog,
        fetcher,
        Arc::new(GetState::new()),
        shutdown,
    )
    .with_progress(job_progress_bar(jobs.len() as u64));

    let mut done: Vec<ScanJob> = Vec::new();
    let summary = orchestrator.run(jobs, &mut done).await;
    info!("Run finished in {} ms", summary.elapsed_ms);

    let report = Report::new(summary.clone(), &done);
    let format = ReportFormat::from(cli.format);
    let (report_path, payload_path) = report_paths(&cli.output_dir, &cli.output, format, started);
    ReportGenerator::generate_report(&report, &report_path, format)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    let written = ReportGenerator::write_payload_list(&report, &payload_path)
        .with_context(|| format!("Failed to write {}", payload_path.display()))?;

    display_summary(&summary);
    print_outputs(&report_path, &payload_path, written);
    Ok(summary)
}

fn display_summary(summary: &RunSummary) {
    println!("\nScan Summary");
    println!("================");
    if summary.interrupted {
        println!("{}", "Run interrupted, results are partial".yellow());
    }
    println!("  Parameters: {}", summary.total);
    println!("  Completed: {}", summary.completed.to_string().green());
    println!("  Failed: {}", summary.failed.to_string().red());
    println!("  Abandoned: {}", summary.abandoned.to_string().yellow());
    println!("  Payloads: {}", summary.payload_count.to_string().cyan());
    println!(
        "  Requests: {} ({} ok, {} failed, {} retries, {} network errors)",
        summary.requests,
        summary.successful_requests.to_string().green(),
        summary.failed_requests.to_string().red(),
        summary.retries,
        summary.network_errors
    );

    if !summary.failures.is_empty() {
        println!("\nFailed parameters:");
        for failure in &summary.failures {
            println!(
                "  {} {} [{}]: {}",
                "✗".red(),
                failure.url,
                failure.parameter.bold(),
                failure.reason
            );
        }
    }
}

fn print_outputs(report_path: &Path, payload_path: &Path, written: usize) {
    println!("\nReport saved to: {}", report_path.display());
    println!(
        "Payload list saved to: {} ({} unique payloads)",
        payload_path.display(),
        written
    );
}
