use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use dropwatch_config::{CONFIG_PATH_ENV, ConfigSource, IngestConfig};
use dropwatch_core::PipelineEventBus;
use dropwatch_server::build_host;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dropwatch")]
#[command(about = "Watches drop folders and hands each file to its endpoint's handler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print the resolved endpoints
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (config, source) = match &cli.config {
        Some(path) => (IngestConfig::load_from_file(path)?, ConfigSource::File(path.clone())),
        None => IngestConfig::load_from_env()?,
    };

    if let Some(Command::Check) = cli.command {
        let descriptors = config.descriptors()?;
        println!("configuration from {source}: {} endpoint(s)", descriptors.len());
        for d in &descriptors {
            println!(
                "  {:<16} {:<10} workers={} drop={} in_progress={} failure={}",
                d.name,
                d.processor.as_str(),
                d.worker_count,
                d.drop_path.display(),
                d.in_progress_path.display(),
                d.failure_path.display(),
            );
        }
        return Ok(());
    }

    let events = PipelineEventBus::default();
    let host = build_host(&config, &events)?;
    if host.is_empty() {
        bail!("no endpoints configured (loaded from {source})");
    }

    info!(
        target: "ingest::host",
        endpoints = host.processors().len(),
        source = %source,
        "starting dropwatch"
    );
    host.start().await?;

    tokio::signal::ctrl_c().await?;
    info!(target: "ingest::host", "shutdown signal received");
    host.stop().await;
    Ok(())
}
