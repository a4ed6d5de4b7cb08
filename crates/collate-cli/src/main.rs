mod commands;
mod local;
mod logging;
mod progress;
mod scan;

use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{debug, error, info, warn};

use collate_core::inventory::{FolderMap, GroupId, GroupMembership, Snapshot};
use collate_core::state::GroupStatus;
use collate_core::{persist, AppConfig, CollateEngine, Event, EventSink, GroupOutcome, RunSummary};

fn main() {
    dotenv().ok();

    let guard = logging::init_logger();

    let config = match collate_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            drop(guard);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Scan) => run_scan(&config).map(|_| ()),
        Some(Commands::Plan) => run_plan(&config),
        Some(Commands::Run) => run_execute(&config),
        Some(Commands::Process) => run_process(&config),
        Some(Commands::Status) => run_status(&config),
        Some(Commands::Reset { group, yes }) => run_reset(&config, &group, yes),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        drop(guard);
        process::exit(1);
    }
}

/// Run `work` against an engine whose events are logged on a consumer
/// thread. The engine is dropped before returning so the consumer drains every
/// event and exits.
fn with_engine<T>(config: &AppConfig, work: impl FnOnce(&CollateEngine) -> Result<T>) -> Result<T> {
    let (sink, rx) = EventSink::channel();
    let consumer = spawn_event_logger(rx).context("starting event logger")?;

    let engine = CollateEngine::new(config.clone()).with_events(sink);
    let result = work(&engine);
    drop(engine);
    match consumer.join() {
        Ok(count) => debug!("Logged {} event(s)", count),
        Err(_) => warn!("Event logger thread panicked"),
    }
    result
}

/// Logs events until every sender is gone, then returns how many it saw.
fn spawn_event_logger(rx: Receiver<Event>) -> io::Result<JoinHandle<usize>> {
    thread::Builder::new()
        .name("collate-events".to_string())
        .spawn(move || {
            let mut count = 0;
            for event in rx {
                count += 1;
                match event {
                    Event::ChangeDetected { group } => info!("Change detected for '{}'", group),
                    Event::ReportReady { group } => info!("Report ready for '{}'", group.to_string().green()),
                    Event::GroupFailed { group, reason } => warn!("Group '{}' failed: {}", group, reason),
                }
            }
            count
        })
}

fn run_scan(config: &AppConfig) -> Result<Snapshot> {
    let reporter = CliReporter::new();
    let start = Instant::now();
    reporter.on_scan_start();
    let outcome = scan::scan_mirror(
        Path::new(&config.source_root),
        &config.key_scheme,
        &config.ignore_patterns,
        |entries| reporter.on_scan_progress(entries),
    )
    .with_context(|| format!("scanning {}", config.source_root))?;
    reporter.on_scan_complete(outcome.files, outcome.folders, start.elapsed().as_secs_f64());

    let inventory = outcome.snapshot.to_jsonl()?;
    persist::write_bytes_atomic(Path::new(&config.inventory_path), inventory.as_bytes())
        .with_context(|| format!("writing inventory {}", config.inventory_path))?;
    info!(
        "Inventory of {} items ({} bytes of files) written to {}",
        outcome.snapshot.len(),
        outcome.bytes,
        config.inventory_path
    );
    Ok(outcome.snapshot)
}

fn load_inputs(config: &AppConfig) -> Result<(Snapshot, GroupMembership)> {
    let snapshot = Snapshot::load_jsonl(Path::new(&config.inventory_path), &config.key_scheme)
        .with_context(|| format!("reading inventory {}", config.inventory_path))?;
    let folders = FolderMap::load(Path::new(&config.membership_path))
        .with_context(|| format!("reading group folders {}", config.membership_path))?;
    let membership = GroupMembership::from_folder_map(&snapshot, &folders);
    info!(
        "{} inventory items, {} matched groups",
        snapshot.len(),
        membership.len()
    );
    Ok((snapshot, membership))
}

fn run_plan(config: &AppConfig) -> Result<()> {
    let (snapshot, membership) = load_inputs(config)?;
    let reporter = CliReporter::new();

    let report = with_engine(config, |engine| {
        let report = engine.refresh_plans(&snapshot, &membership, &reporter)?;
        engine.commit_snapshot(&snapshot)?;
        Ok(report)
    })?;
    for (group, reason) in &report.failed {
        println!("  {} {}: {}", "✗".red(), group, reason);
    }
    for group in &report.retired {
        println!("  {} {} (no longer matched)", "-".dimmed(), group);
    }
    Ok(())
}

fn run_execute(config: &AppConfig) -> Result<()> {
    let reporter = CliReporter::new();
    let summary = with_engine(config, |engine| {
        Ok(engine.run(local::capabilities(config), &reporter)?)
    })?;
    print_summary(&summary);
    Ok(())
}

fn run_process(config: &AppConfig) -> Result<()> {
    let snapshot = run_scan(config)?;
    let folders = FolderMap::load(Path::new(&config.membership_path))
        .with_context(|| format!("reading group folders {}", config.membership_path))?;
    let membership = GroupMembership::from_folder_map(&snapshot, &folders);

    let reporter = CliReporter::new();
    let report = with_engine(config, |engine| {
        Ok(engine.cycle(&snapshot, &membership, local::capabilities(config), &reporter)?)
    })?;

    println!();
    info!(
        "Planning: {} changed, {} unchanged, {} failed",
        format!("{}", report.planning.changed.len()).cyan(),
        report.planning.unchanged,
        format!("{}", report.planning.failed.len()).red(),
    );
    print_summary(&report.run);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for outcome in &summary.outcomes {
        match outcome {
            GroupOutcome::Completed { group, batches } => {
                println!("  {} {} ({} batch(es))", "✓".green(), group, batches)
            }
            GroupOutcome::Failed { group, reason } => {
                println!("  {} {}: {}", "✗".red(), group, reason)
            }
            GroupOutcome::Skipped { group } => println!("  {} {} (up to date)", "-".dimmed(), group),
        }
    }
    info!(
        "{} completed, {} failed in {}",
        format!("{}", summary.completed()).green(),
        format!("{}", summary.failed()).red(),
        format!("{:.2}s", summary.duration.as_secs_f64()).green(),
    );
}

fn run_status(config: &AppConfig) -> Result<()> {
    let engine = CollateEngine::new(config.clone());
    let rows = engine.status()?;
    if rows.is_empty() {
        println!("No groups planned yet.");
        return Ok(());
    }

    println!(
        "{:<32} {:<12} {:>7} {:>8} {:>6}  {}",
        "GROUP", "STATUS", "BATCHES", "TASKS", "RETRY", "DETAIL"
    );
    for row in rows {
        let status = match row.state.status {
            GroupStatus::Pending => "PENDING".yellow(),
            GroupStatus::InProgress => "IN_PROGRESS".cyan(),
            GroupStatus::Completed => "COMPLETED".green(),
            GroupStatus::Failed => "FAILED".red(),
        };
        let (batches, tasks) = row
            .plan
            .as_ref()
            .map(|plan| (plan.batches.len(), plan.task_count()))
            .unwrap_or_default();
        let done = row.state.succeeded_tasks();
        println!(
            "{:<32} {:<12} {:>7} {:>8} {:>6}  {}",
            row.group.as_str(),
            status,
            batches,
            format!("{done}/{tasks}"),
            row.state.retry_count,
            row.state.failure_reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn run_reset(config: &AppConfig, group: &str, yes: bool) -> Result<()> {
    let confirmed = yes
        || prompt_confirm(
            &format!("Reset all execution state for '{group}'?"),
            Some(false),
        )?;
    if !confirmed {
        return Ok(());
    }
    CollateEngine::new(config.clone()).reset_group(&GroupId::new(group))?;
    println!("Group '{}' will be prepared from scratch on the next run", group);
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
