use anyhow::{Context, Result};
use clap::Parser;
use flock_core::logging::{init_logging_with_config, LogConfig};
use flock_core::store::{MemoryStore, RedisStore, Store};
use flock_core::telemetry::init_metrics;
use flock_core::{Config, TimelineService};
use flock_server::FlockServer;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flock")]
#[command(author, version, about = "Timeline fan-out server", long_about = None)]
struct Args {
    /// TOML configuration file; FLOCK_* environment variables are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the HTTP listener
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Key-value store URL, e.g. redis://127.0.0.1:6379
    #[arg(long)]
    store_url: Option<String>,

    /// Keep all state in process memory instead of a remote store
    #[arg(long)]
    memory: bool,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(url) = args.store_url.clone() {
        config.store.url = url;
    }
    if let Some(level) = args.log_level.clone() {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    config.validate()?;

    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;

    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(config.metrics.bind_address)
            .install()
            .context("installing Prometheus exporter")?;
        info!(addr = %config.metrics.bind_address, "Prometheus metrics exporter started");
    }
    init_metrics();

    if args.memory {
        info!("Using in-process store; state is lost on exit");
        serve(MemoryStore::new(), &config).await
    } else {
        let store_config = config.store.clone();
        // the pool opens its idle connections eagerly
        let store = tokio::task::spawn_blocking(move || RedisStore::connect(&store_config))
            .await?
            .context("connecting to the key-value store")?;
        serve(store, &config).await
    }
}

async fn serve<S: Store>(store: S, config: &Config) -> Result<()> {
    let service = TimelineService::new(store, &config.timeline);
    FlockServer::new(service, config).run().await
}
