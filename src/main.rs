//! Keelhaul - quorum-safe memory remediation
//!
//! Probes a fleet of hosts for the memory use of one systemd service,
//! and restarts the over-threshold ones one at a time, never dropping
//! the fleet below its healthy floor.

mod channel;
mod cli;
mod error;
mod logbook;
mod manifest;
mod muster;
mod patrol;
mod sickbay;
mod warden;

use channel::SshChannel;
use cli::{Cli, Commands};
use error::Result;
use logbook::{Logbook, RunRecord};
use manifest::KeelhaulConfig;
use patrol::Patrol;
use sickbay::{Decision, FleetSnapshot};

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code when a run finished but at least one restart failed
const EXIT_RESTART_FAILED: i32 = 2;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("keelhaul={}", level))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    init_tracing(cli.verbose);

    let (path, explicit) = cli.config_path();
    let mut config = manifest::load(&path, explicit)?;
    cli.overrides.apply(&mut config);
    config.validate()?;

    match cli.command {
        Commands::Check => check(&config),
        Commands::Triggers { json } => triggers(&config, json),
        Commands::Probe { json } => probe(config, json),
        Commands::Run { dry_run } => remediate(config, dry_run),
        Commands::Completion { .. } => Ok(()),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| error::Error::Io(std::io::Error::other(e)))
}

fn check(config: &KeelhaulConfig) -> Result<()> {
    let muster = muster::resolve(config)?;

    println!("Configuration OK");
    println!("  Service:   {}", config.service.name);
    println!("  Threshold: {}%", config.service.threshold_percent);
    println!("  Floor:     {} other healthy", config.quorum.min_other_healthy);
    println!("  Log dir:   {}", config.logbook.dir.display());
    println!(
        "  Inventory: {} target(s) from {}",
        muster.targets.len(),
        muster.source
    );
    for target in &muster.targets {
        println!("    {}", target);
    }
    for skipped in &muster.skipped {
        println!(
            "    skipped line {}: '{}' ({})",
            skipped.line, skipped.content, skipped.note
        );
    }
    Ok(())
}

fn triggers(config: &KeelhaulConfig, json: bool) -> Result<()> {
    let logbook = Logbook::new(&config.logbook.dir);
    let markers = logbook.list_triggers()?;

    if json {
        let list: Vec<_> = markers.iter().map(|(_, m)| m).collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if markers.is_empty() {
        println!("No trigger markers in {}", logbook.triggers_dir().display());
        return Ok(());
    }

    println!(
        "{:<22} {:<24} {:<12} {:<16} {:<16}",
        "TIME", "HOST", "STATUS", "BEFORE", "AFTER"
    );
    println!("{}", "-".repeat(92));
    for (_, marker) in &markers {
        println!(
            "{:<22} {:<24} {:<12} {:<16} {:<16}",
            marker.timestamp.format("%Y-%m-%d %H:%M:%S"),
            marker.host,
            marker.status,
            node_cell(marker.pre_pid, marker.pre_memory_pct),
            node_cell(marker.post_pid, marker.post_memory_pct),
        );
    }
    Ok(())
}

fn node_cell(pid: Option<u32>, mem: Option<f64>) -> String {
    match (pid, mem) {
        (Some(pid), Some(mem)) => format!("{} @ {:.1}%", pid, mem),
        (Some(pid), None) => pid.to_string(),
        _ => "-".to_string(),
    }
}

fn probe(config: KeelhaulConfig, json: bool) -> Result<()> {
    let muster = muster::resolve(&config)?;
    let channel = Arc::new(SshChannel::from_config(&config));
    let patrol = Patrol::new(config, channel);

    let rt = runtime()?;
    let (snapshot, decisions) = rt.block_on(patrol.survey(&muster.targets));

    if json {
        let out = serde_json::json!({
            "snapshot": snapshot,
            "decisions": decisions,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_assessment(&snapshot, &decisions);
    }
    Ok(())
}

fn remediate(config: KeelhaulConfig, dry_run: bool) -> Result<()> {
    let muster = muster::resolve(&config)?;
    for skipped in &muster.skipped {
        tracing::warn!(line = skipped.line, content = %skipped.content, note = %skipped.note, "Inventory line skipped");
    }

    let logbook = Logbook::new(&config.logbook.dir);
    let channel = Arc::new(SshChannel::from_config(&config));
    let patrol = Patrol::new(config, channel);

    let rt = runtime()?;
    let record = rt.block_on(patrol.run(
        &muster,
        dry_run,
        patrol::shutdown_on(tokio::signal::ctrl_c()),
    ));

    let logged = patrol::log_run(&logbook, &record)?;

    print_assessment(&record.snapshot, &record.decisions);
    print_outcomes(&record);
    println!();
    println!("Run record: {}", logged.record.display());
    for trigger in &logged.triggers {
        println!("Trigger:    {}", trigger.display());
    }

    if record.restarts_failed() {
        eprintln!("Error: one or more restarts failed");
        std::process::exit(EXIT_RESTART_FAILED);
    }
    Ok(())
}

fn print_assessment(snapshot: &FleetSnapshot, decisions: &[Decision]) {
    println!("Healthy: {} of {}", snapshot.healthy_count(), snapshot.results().len());
    println!();
    println!("{:<24} {:<44} {:<8} {}", "HOST", "STATE", "ACTION", "REASON");
    println!("{}", "-".repeat(100));
    for (result, decision) in snapshot.results().iter().zip(decisions) {
        println!(
            "{:<24} {:<44} {:<8} {}",
            result.target().address(),
            result.summary(),
            decision.action,
            decision.reason
        );
    }
}

fn print_outcomes(record: &RunRecord) {
    if record.dry_run {
        println!();
        println!("Dry run: no restarts executed");
        return;
    }
    if record.interrupted {
        println!();
        println!("Interrupted: no restarts executed");
        return;
    }
    if record.remediation.outcomes.is_empty() {
        return;
    }

    println!();
    println!("{:<24} {:<18} {}", "HOST", "OUTCOME", "DETAIL");
    println!("{}", "-".repeat(80));
    for outcome in &record.remediation.outcomes {
        println!(
            "{:<24} {:<18} {}",
            outcome.target.address(),
            outcome.status,
            outcome.message
        );
    }
    if let Some(error) = &record.remediation.error {
        println!("Orchestration error: {}", error);
    }
}
