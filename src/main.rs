use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use mnc_aggregator::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Aggregates per-subsystem etcd monitor points into summary points written to
/// /mon/<subsystem>/summary/<device>.
#[derive(Parser, Debug)]
#[command(name = "mnc-aggregator", version)]
struct Args {
    /// Seconds between aggregation passes [default: 60, or aggregator.interval_secs]
    #[arg(short, long)]
    interval: Option<f64>,

    /// Config file (defaults to $CONFIG_FILE, then ./config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

#[cfg(feature = "etcd")]
async fn connect_store(config: &config::StoreConfig) -> Result<Arc<dyn store::KvStore>> {
    Ok(Arc::new(store::EtcdStore::connect(config).await?))
}

#[cfg(not(feature = "etcd"))]
async fn connect_store(_config: &config::StoreConfig) -> Result<Arc<dyn store::KvStore>> {
    tracing::warn!("built without etcd support; using an empty in-memory store");
    Ok(Arc::new(store::MemoryStore::new()))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let args = Args::parse();
    let mut app_config = config::AppConfig::load(args.config.as_deref())?;
    if let Some(interval) = args.interval {
        app_config.aggregator.interval_secs = interval;
    }
    let interval = app_config.aggregator.interval()?;
    tracing::info!(
        interval_secs = app_config.aggregator.interval_secs,
        "starting {}",
        version::banner()
    );

    let store = connect_store(&app_config.store).await?;
    let aggregator = worker::Aggregator::new(store, Arc::new(staleness::SystemClock))
        .with_collectors(collectors::from_config(&app_config))?;
    tracing::info!(collectors = ?aggregator.collector_names(), "collectors registered");

    if args.once {
        let reports = aggregator
            .run_one_pass(app_config.aggregator.concurrent)
            .await;
        for report in &reports {
            tracing::info!(
                collector = report.collector,
                points_written = report.points_written,
                outcome = ?report.outcome,
                "pass report"
            );
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = worker::spawn(
        Arc::new(aggregator),
        worker::WorkerConfig {
            interval,
            concurrent: app_config.aggregator.concurrent,
        },
        shutdown_rx,
    );

    shutdown_signal().await;
    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    worker_handle.await?;
    tracing::info!("Exiting mnc-aggregator");

    Ok(())
}
