//! Servrack: a supervisor for a rack of locally-built service artifacts.
//!
//! This is the entry point. It parses command-line arguments, loads the
//! configuration, wires up the supervisor, status monitor and event channel,
//! and runs a small line-oriented console over the supervisor's
//! presentation-facing interface.

mod config;
mod errors;
mod events;
mod monitor;
mod output;
mod registry;
mod sequencer;
mod state;
mod supervisor;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::load_config;
use crate::events::SupervisorEvent;
use crate::registry::ServiceRegistry;
use crate::supervisor::Supervisor;

/// Lines shown by the `tail` console command.
const TAIL_LINES: usize = 4;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "servrack",
    version,
    about = "Launches, stops and health-monitors a rack of locally-built services"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "servrack.toml")]
    config: PathBuf,
    /// Kick off the start-all sequence immediately.
    #[arg(long)]
    start_all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("servrack=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let settings = config.settings()?;
    let registry = ServiceRegistry::from_config(&config);
    if registry.is_empty() {
        bail!("no services defined in {}", cli.config.display());
    }
    tracing::info!(services = registry.len(), "registry loaded");
    for (id, def) in registry.list().iter().enumerate() {
        tracing::debug!(id, name = %def.name, artifact = %def.artifact, "registered service");
    }

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let sup = Supervisor::new(registry, settings, event_tx);
    let monitor = monitor::spawn(sup.clone());

    if cli.start_all {
        let sup = sup.clone();
        tokio::spawn(async move {
            if let Err(err) = sup.start_all().await {
                warn!(error = %err, "start-all rejected");
            }
        });
    }

    print_snapshot(&sup);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => print_event(&event),
                    None => break,
                }
            }
            line = stdin.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => {
                        if !dispatch(&sup, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    sup.stop_all().await;
    monitor.abort();
    Ok(())
}

/// Executes one console command. Returns false when the console should exit.
async fn dispatch(sup: &Supervisor, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return true;
    };
    let rest: Vec<&str> = parts.collect();
    match cmd {
        "quit" | "exit" => return false,
        "status" => {
            if rest.first() == Some(&"--json") {
                match serde_json::to_string_pretty(&sup.snapshot()) {
                    Ok(json) => println!("{json}"),
                    Err(err) => eprintln!("error: {err}"),
                }
            } else {
                print_snapshot(sup);
            }
        }
        "start" => {
            if let Some(id) = resolve(sup, &rest) {
                if let Err(err) = sup.start(id).await {
                    eprintln!("error: {err}");
                }
            }
        }
        "stop" => {
            if let Some(id) = resolve(sup, &rest) {
                if let Err(err) = sup.stop(id).await {
                    eprintln!("error: {err}");
                }
            }
        }
        "start-all" => {
            // Runs in the background so the console stays responsive across
            // the warm-up and stagger delays.
            let sup = sup.clone();
            tokio::spawn(async move {
                if let Err(err) = sup.start_all().await {
                    eprintln!("error: {err}");
                }
            });
        }
        "stop-all" => sup.stop_all().await,
        "log" => {
            if let Some(id) = resolve(sup, &rest) {
                if let Some(log) = sup.full_log(id) {
                    println!("{log}");
                }
            }
        }
        "tail" => {
            if let Some(id) = resolve(sup, &rest) {
                if let Some(tail) = sup.tail_log(id, TAIL_LINES) {
                    println!("{tail}");
                }
            }
        }
        "path" => {
            if rest.len() < 2 {
                eprintln!("usage: path <service> <artifact>");
            } else if let Some(id) = resolve(sup, &rest) {
                sup.set_artifact_path(id, rest[1..].join(" "));
            }
        }
        _ => {
            eprintln!(
                "commands: status [--json], start <service>, stop <service>, \
                 start-all, stop-all, log <service>, tail <service>, \
                 path <service> <artifact>, quit"
            );
        }
    }
    true
}

fn resolve(sup: &Supervisor, rest: &[&str]) -> Option<usize> {
    let Some(name) = rest.first() else {
        eprintln!("usage: <command> <service>");
        return None;
    };
    match sup.find_service(name) {
        Some(id) => Some(id),
        None => {
            eprintln!("unknown service: {name}");
            None
        }
    }
}

fn print_snapshot(sup: &Supervisor) {
    println!("{:<24} {:<9} {:>7}  {}", "SERVICE", "STATUS", "PID", "ARTIFACT");
    for snap in sup.snapshot() {
        let pid = snap
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<24} {:<9} {:>7}  {}",
            snap.name, snap.status, pid, snap.artifact
        );
    }
}

fn print_event(event: &SupervisorEvent) {
    match event {
        SupervisorEvent::StatusChanged { snapshot } => {
            let pid = snapshot
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into());
            println!("[{}] {} (pid {})", snapshot.status, snapshot.name, pid);
        }
        SupervisorEvent::SequenceStep { name, .. } => println!("[sequence] starting {name}"),
        SupervisorEvent::SequenceFinished => println!("[sequence] finished"),
    }
}
