//! beacon-alerter - Beacon alert classifier
//!
//! Classifies monitor observations and republishes the resulting alerts.

use std::path::{Path, PathBuf};

use beacon_alerter::{AlerterConfig, AlerterKind};
use beacon_alerts::CancellationToken;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "beacon-alerter")]
#[command(about = "Beacon alert classifier")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "BEACON_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an alerter
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/beacon/alerter.toml")]
        config: PathBuf,

        /// Observations as JSON lines, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/beacon/alerter.toml")]
        output: PathBuf,

        /// Alerter to configure
        #[arg(long, value_enum, default_value = "system")]
        kind: AlerterKind,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries alerts.
    let filter = EnvFilter::from_default_env().add_directive("beacon=info".parse()?);
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    match cli.command {
        Commands::Run { config, input } => {
            run_alerter(&config, &input).await?;
        }

        Commands::InitConfig { output, kind } => {
            init_config(&output, kind)?;
        }
    }

    Ok(())
}

async fn run_alerter(config_path: &Path, input: &str) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting beacon-alerter");

    let config = AlerterConfig::from_file(config_path)?;
    info!(
        kind = ?config.alerter.kind(),
        max_queue_size = config.pipeline.max_queue_size,
        "loaded config"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .map_err(|e| anyhow::anyhow!("failed to open input '{input}': {e}"))?;
        Box::new(BufReader::new(file))
    };

    match beacon_alerter::run(&config, reader, tokio::io::stdout(), cancel).await {
        Ok(summary) => {
            info!(
                observations = summary.observations,
                alerts = summary.alerts,
                published = summary.pipeline.alerts_published,
                "beacon-alerter stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "beacon-alerter failed");
            Err(e.into())
        }
    }
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!("failed to install SIGTERM handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received SIGINT, shutting down");
        }
        () = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}

fn init_config(output: &Path, kind: AlerterKind) -> anyhow::Result<()> {
    let config = AlerterConfig::sample(kind);
    config.save(output)?;

    println!("Config written to: {}", output.display());
    println!();
    println!("Edit the [alerter] section, then run:");
    println!("  beacon-alerter run --config {}", output.display());

    Ok(())
}
