#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rollup_engine::{spawn, EngineConfig, StatePersister};
use rollup_node::config::{load_config, LoggingConfig, NodeConfig};
use rollup_node::http::{router, unix_now, AppState, EngineSnapshot};
use rollup_node::metrics::Metrics;
use rollup_node::watcher::{spawn_watcher, WatcherConfig};
use rollup_node::{build_engine, NodeError};
use rollup_storage::Storage;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Rollup engine node")]
struct Args {
    /// Path to a TOML config file. Without one, defaults plus `ROLLUP_*` env vars apply.
    #[arg(long, env = "ROLLUP_NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `storage.path`.
    #[arg(long, env = "ROLLUP_DB_PATH")]
    db_path: Option<String>,

    /// Overrides `server.bind_address`.
    #[arg(long, env = "ROLLUP_LISTEN_ADDR")]
    listen_addr: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the engine, the evacuation watcher and the HTTP API (default).
    Serve,
    /// Print the persisted counters as JSON and exit.
    Status,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "node terminated with error");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), NodeError> {
    let args = Args::parse();
    let (mut config, engine_config) = match &args.config {
        Some(path) => {
            let config = load_config(&path.to_string_lossy()).map_err(NodeError::Config)?;
            let engine = config
                .engine
                .to_engine_config()
                .map_err(NodeError::Config)?;
            (config, engine)
        }
        None => (NodeConfig::default(), EngineConfig::from_env()),
    };
    if let Some(db_path) = args.db_path {
        config.storage.path = db_path;
    }
    if let Some(listen_addr) = args.listen_addr {
        config.server.bind_address = listen_addr;
    }
    config.validate().map_err(NodeError::Config)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_tracing(&config.logging);
            serve(config, engine_config).await
        }
        Command::Status => status(&config, engine_config),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

async fn serve(config: NodeConfig, engine_config: EngineConfig) -> Result<(), NodeError> {
    info!(label = %config.node.label, db = %config.storage.path, "starting rollup-node");
    let storage = Arc::new(Storage::open(&config.storage.path)?);
    let engine = build_engine(&config, engine_config, &storage)?;
    let handle = spawn(engine, storage as Arc<dyn StatePersister>);

    let watcher = if config.watcher.enabled {
        Some(spawn_watcher(
            WatcherConfig {
                interval: Duration::from_secs(config.watcher.interval_secs),
            },
            handle.clone(),
            unix_now,
        ))
    } else {
        warn!("evacuation watcher disabled");
        None
    };

    let metrics = if config.server.metrics_enabled {
        Some(Metrics::new()?)
    } else {
        None
    };
    let state = AppState {
        engine: handle,
        metrics,
        label: config.node.label.clone(),
        start_instant: Instant::now(),
        clock: unix_now,
    };

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .map_err(|e| NodeError::Config(format!("invalid server.bind_address: {e}")))?;
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| NodeError::Server(e.to_string()))?;

    if let Some(watcher) = watcher {
        watcher.stop();
    }
    info!("rollup-node stopped");
    Ok(())
}

fn status(config: &NodeConfig, engine_config: EngineConfig) -> Result<(), NodeError> {
    let storage = Storage::open(&config.storage.path)?;
    let engine = build_engine(config, engine_config, &storage)?;
    let snapshot = EngineSnapshot::of(&engine, unix_now());
    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| NodeError::Server(format!("failed to encode status: {e}")))?;
    println!("{json}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
