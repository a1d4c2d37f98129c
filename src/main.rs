//! Pipeline simulator CLI

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use pipeline_core::{Coordinator, PipelineConfig, RunReport, Termination, TracingSink};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Bounded producer/consumer pipeline simulator
#[derive(Parser, Debug)]
#[command(name = "pipeline-sim", version, about, long_about = None)]
struct Cli {
    /// Number of producers [default: 10]
    #[arg(short = 'p', long = "producers")]
    producers: Option<usize>,

    /// Number of consumers [default: 5]
    #[arg(short = 'c', long = "consumers")]
    consumers: Option<usize>,

    /// Number of messages per producer [default: 5]
    #[arg(short = 'm', long = "messages")]
    messages: Option<usize>,

    /// Bounded channel capacity [default: 100]
    #[arg(long = "capacity")]
    capacity: Option<usize>,

    /// Shutdown grace period in seconds [default: 60]
    #[arg(long = "grace-secs")]
    grace_secs: Option<u64>,

    /// Seconds between stats reports, 0 disables [default: 5]
    #[arg(long = "stats-interval-secs")]
    stats_interval_secs: Option<u64>,

    /// JSON config file; flags override its values
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long = "report")]
    report: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long = "metrics-listen")]
    metrics_listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging, including every produced and consumed item
    #[arg(short, long)]
    verbose: bool,

    /// Errors only
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => PipelineConfig::from_env()?,
        };

        if let Some(producers) = self.producers {
            config.producers = producers;
        }
        if let Some(consumers) = self.consumers {
            config.consumers = consumers;
        }
        if let Some(messages) = self.messages {
            config.messages_per_producer = messages;
        }
        if let Some(capacity) = self.capacity {
            config.channel_capacity = capacity;
        }
        if let Some(secs) = self.grace_secs {
            config.shutdown_grace_ms = secs.saturating_mul(1_000);
        }
        if let Some(secs) = self.stats_interval_secs {
            config.stats_interval_ms = (secs > 0).then(|| secs.saturating_mul(1_000));
        }
        Ok(config)
    }
}

/// Panicked or failed workers turn into a non-zero exit
fn check_workers(report: &RunReport) -> anyhow::Result<()> {
    let failed = report.stats.failed_workers;
    if failed > 0 {
        anyhow::bail!("{failed} worker(s) failed during the run");
    }
    Ok(())
}

fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if cli.json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(&cli)?;

    let config = cli.pipeline_config()?;
    let coordinator = Coordinator::new(config, Arc::new(TracingSink::default()))
        .context("invalid pipeline configuration")?;

    if let Some(addr) = cli.metrics_listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal.cancel();
        }
    });

    let outcome = coordinator.run_with_cancel(cancel).await;

    match outcome.termination() {
        Termination::Completed => {}
        Termination::Cancelled => warn!(
            consumed = outcome.report.consumed,
            expected = outcome.report.expected,
            "run cancelled, results are partial"
        ),
        Termination::GraceExpired => warn!(
            consumed = outcome.report.consumed,
            expected = outcome.report.expected,
            "grace period expired, results are partial"
        ),
    }

    if let Some(path) = &cli.report {
        outcome
            .report
            .write_json(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    check_workers(&outcome.report)
}
