//! Provisioner - onboards discovered nodes onto configuration-management masters.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use notify::Notifier;
use provisioner::config::{Settings, DEFAULT_CONFIG_PATH};
use provisioner::context::ProvisionContext;
use provisioner::remote::mco::McoFleet;
use provisioner::supervisor::Supervisor;

/// Provisioner CLI.
#[derive(Parser)]
#[command(name = "provisioner")]
#[command(about = "Continuously provision discovered nodes against configuration masters")]
#[command(version)]
struct Cli {
    /// Path to the settings file.
    #[arg(short, long, env = "PROVISIONER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single discovery cycle and exit.
    #[arg(long)]
    once: bool,

    /// Validate the settings, print the enabled steps and exit.
    #[arg(long)]
    check_config: bool,

    /// Enable debug logging (overrides RUST_LOG and logLevel).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    // --verbose, then RUST_LOG, then the configured level
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    for warning in settings.warnings() {
        warn!("{warning}");
    }

    if cli.check_config {
        let steps: Vec<&str> = settings.steps.enabled_steps().map(|s| s.name()).collect();
        println!("Configuration OK: {}", cli.config.display());
        println!("Target agent: {}", settings.target.agent);
        println!("Enabled steps: {}", steps.join(" → "));
        return Ok(());
    }

    let fleet = Arc::new(McoFleet::new(settings.mco.clone()));
    let notifier = Arc::new(Notifier::with_slack_webhook(
        settings.notify.slack_webhook_url.clone(),
    ));
    let once = cli.once;
    let ctx = Arc::new(ProvisionContext::new(
        settings,
        fleet.clone(),
        notifier.clone(),
    ));
    let supervisor = Supervisor::new(ctx, fleet);

    if once {
        let cycle = supervisor.run_cycle().await;
        // Deliveries still in flight are cancelled when the runtime stops.
        notifier.flush().await;
        let report = cycle.context("Provisioning cycle failed")?;
        info!(
            provisioned = report.provisioned.len(),
            already_provisioned = report.already_provisioned.len(),
            failed = report.failed.len(),
            "Cycle complete"
        );
        if report.has_failures() {
            anyhow::bail!("Failed to provision: {}", report.failed.join(", "));
        }
        return Ok(());
    }

    tokio::select! {
        never = supervisor.run() => match never {},
        () = shutdown_signal() => info!("Received interrupt, exiting"),
    }

    // In-flight remote calls are abandoned and locks stay held.
    std::process::exit(0)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
