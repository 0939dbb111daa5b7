//! Warden CLI entry point.
//!
//! `start` runs the enforcement service until Ctrl-C or SIGTERM; `check`
//! evaluates every policy once without acting and prints the result.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use warden::config::{load_or_default, WardenConfig};
use warden::host::Host;
use warden::service::Assembly;

/// Warden: keeps this host compliant with its process and account policy.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Path to warden.toml (default: next to the executable).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the enforcement service until stopped.
    Start,
    /// Evaluate every policy once, print the result as JSON and exit.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Start => handle_start(config).await,
        Command::Check => handle_check(config).await,
    }
}

/// Run the service until Ctrl-C (stop) or SIGTERM (system shutdown).
async fn handle_start(config: WardenConfig) -> anyhow::Result<()> {
    let paths = config.policy_paths()?;
    let _logging_guard = warden::logging::init_production(&paths.logs_dir)?;

    let host = native_host(&config)?;
    let assembly = Assembly::new(&config, paths.clone(), host)?;
    info!(
        forbidden = %paths.forbidden_list.display(),
        protected = %paths.protected_list.display(),
        users = %paths.authorized_users.display(),
        "warden starting"
    );

    let mut service = assembly.start();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("received interrupt, stopping");
            service.on_stop().await;
        }
        () = terminate_signal() => {
            info!("received SIGTERM, host is shutting down");
            service.on_shutdown().await;
        }
    }
    Ok(())
}

/// One read-only pass over every policy.
async fn handle_check(config: WardenConfig) -> anyhow::Result<()> {
    warden::logging::init_cli()?;

    let paths = config.policy_paths()?;
    let host = native_host(&config)?;
    let assembly = Assembly::new(&config, paths, host)?;
    let assessment = assembly.enforcer.assess().await;

    let json =
        serde_json::to_string_pretty(&assessment).context("failed to serialise assessment")?;
    println!("{json}");
    Ok(())
}

#[cfg(target_os = "linux")]
fn native_host(config: &WardenConfig) -> anyhow::Result<Arc<dyn Host>> {
    Ok(Arc::new(warden::host::linux::LinuxHost::new(&config.host)))
}

#[cfg(not(target_os = "linux"))]
fn native_host(_config: &WardenConfig) -> anyhow::Result<Arc<dyn Host>> {
    anyhow::bail!("warden has no host backend for this platform")
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
