//! Kuba pipeline agent
//!
//! Hosts the process-wide label store and its staleness sweep.
//!
//! # CLI Commands
//!
//! - `start` - Run the agent until Ctrl+C or SIGTERM (default)
//! - `check-config` - Validate the configuration file and print a summary
//!
//! # Configuration
//!
//! The agent reads configuration from:
//! 1. `--config FILE`
//! 2. `KUBA_CONFIG` environment variable (path to TOML file)
//! 3. `./kuba-agent.toml` in current directory
//! 4. Default configuration
//!
//! `KUBA_*` environment variables override file values in every case.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kuba_pipeline::{
    cache::{sanitize_url, CacheBackend},
    config::{AgentConfig, RejectedOverride},
    labelstore::LabelStoreService,
    metrics::gather_metrics,
    services::ServiceManager,
};
use prometheus::Registry;
use tokio::signal;
use tracing::{debug, info, warn};

const DEFAULT_CONFIG_FILE: &str = "kuba-agent.toml";

/// Kuba agent - series identity core of the telemetry pipeline
#[derive(Parser)]
#[command(name = "kuba-agent")]
#[command(version)]
#[command(about = "Telemetry pipeline agent hosting the shared label store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides KUBA_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent (default)
    Start,

    /// Validate configuration file without starting the agent
    CheckConfig,
}

/// Resolve and load the configuration
///
/// Environment overrides that did not parse are returned alongside.
fn load_config(
    cli: &Cli,
) -> Result<(AgentConfig, Vec<RejectedOverride>), Box<dyn std::error::Error>> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("KUBA_CONFIG").map(PathBuf::from))
        .or_else(|| {
            let local = PathBuf::from(DEFAULT_CONFIG_FILE);
            local.exists().then_some(local)
        });

    let (config, rejected) = match path {
        Some(path) => AgentConfig::from_file_with_env(&path)?,
        None => AgentConfig::from_env(),
    };
    config.validate()?;
    Ok((config, rejected))
}

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (config, rejected) = load_config(cli)?;

    println!("Configuration is valid!");
    for r in &rejected {
        println!("  ignored {}={:?}: {}", r.var, r.value, r.reason);
    }
    println!();
    println!("Label Store:");
    println!("  Shards: {}", config.labelstore.shards);
    println!("  Stale duration: {}s", config.labelstore.stale_duration_secs);
    println!("  Check interval: {}s", config.labelstore.check_interval_secs);
    println!();
    println!("Relabel Cache:");
    println!("  Backend: {}", config.relabel.cache.backend);
    match config.relabel.cache.backend {
        CacheBackend::InMemory => {
            println!("  Size: {}", config.relabel.cache.in_memory.cache_size);
        },
        CacheBackend::Redis => {
            // Sanitize URL to hide credentials
            println!("  URL: {}", sanitize_url(&config.relabel.cache.redis.url));
            println!("  Key prefix: {}", config.relabel.cache.redis.key_prefix);
        },
        CacheBackend::Memcached => {
            println!("  (memcached is not supported by this build)");
        },
    }
    println!();
    println!("Monitoring:");
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(
                error = %e,
                "Ctrl+C handler installation failed - graceful shutdown unavailable"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => return cmd_check_config(&cli),
        Some(Commands::Start) | None => {},
    }

    let (config, rejected) = load_config(&cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("Starting Kuba agent v{}", env!("CARGO_PKG_VERSION"));
    for r in &rejected {
        warn!(
            var = r.var,
            value = %r.value,
            reason = %r.reason,
            "Ignoring invalid environment override"
        );
    }
    debug!(?config, "Configuration loaded");

    let registry = Registry::new();
    let labelstore = Arc::new(LabelStoreService::new(config.labelstore.clone(), &registry)?);
    info!(
        shards = config.labelstore.shards,
        stale_duration_secs = config.labelstore.stale_duration_secs,
        "Label store initialized"
    );

    let manager = ServiceManager::with_defaults();
    manager.register(labelstore)?;
    manager.start_all().await?;
    for (name, status) in manager.status() {
        debug!(service = name, ?status, "Service status");
    }

    shutdown_signal().await;

    if let Err(e) = manager.shutdown().await {
        warn!(error = %e, "Services did not stop cleanly");
    }

    if config.monitoring.log_metrics_on_shutdown {
        match gather_metrics(&registry) {
            Ok(text) => info!("Final metrics:\n{}", text),
            Err(e) => warn!(error = %e, "Failed to gather metrics"),
        }
    }

    info!("Kuba agent stopped");
    Ok(())
}
