use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use serveplane::backend::BackendFactory;
use serveplane::cluster::{ClusterView, InMemoryCluster};
use serveplane::config::ServeConfig;
use serveplane::Gateway;

/// Serveplane — serverless serving plane with KPA autoscaling
#[derive(Parser)]
#[command(name = "serveplane", version, about)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "serveplane.yaml")]
    config: String,

    /// Target keys to register (namespace/name)
    #[arg(short, long, default_value = "default/hello")]
    targets: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("Serveplane v{}", env!("CARGO_PKG_VERSION"));

    let config = if std::path::Path::new(&cli.config).exists() {
        tracing::info!(config = %cli.config, "Loading configuration");
        ServeConfig::from_file(&cli.config).await?
    } else {
        tracing::warn!("Config file not found, using defaults");
        ServeConfig::default()
    };

    // Demo wiring: an in-memory cluster serves as both the replica scaler
    // and the pod-ready oracle, with fake executors behind it.
    let cluster = Arc::new(InMemoryCluster::new());
    let factory = BackendFactory::from_config(&config.backend);
    let gateway = Arc::new(Gateway::new(
        &config,
        &cli.targets,
        factory,
        cluster.clone(),
        cluster.clone(),
    )?);

    let root = CancellationToken::new();
    gateway.run(root.clone());

    // Membership pump: mirror the cluster's ready sets into the
    // dispatchers, standing in for an event-driven watch.
    {
        let gateway = gateway.clone();
        let cluster = cluster.clone();
        let targets = cli.targets.clone();
        let ctx = root.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    _ = ticker.tick() => {
                        for target in &targets {
                            let ready = match cluster.ready_endpoints(target).await {
                                Ok(ready) => ready,
                                Err(err) => {
                                    tracing::warn!(target = %target, error = %err, "failed to list endpoints");
                                    continue;
                                }
                            };
                            if let Err(err) = gateway.reconcile_endpoints(target, &ready).await {
                                tracing::warn!(target = %target, error = %err, "failed to reconcile dispatcher");
                            }
                        }
                    }
                }
            }
        });
    }

    tracing::info!(targets = ?cli.targets, "Serving plane ready — press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    root.cancel();
    // Give relays and workers a moment to observe cancellation.
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
