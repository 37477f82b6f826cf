//! Task lifecycle service.
//!
//! Aggregates task submissions behind an HTTP API, durably tracks their
//! state in Redis (or an in-memory store for local development), and
//! dispatches them to an external scheduler over HTTP. See `DESIGN.md` for
//! how this maps onto the originating specification.

#[cfg(not(windows))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod api;
mod config;
mod event_processor;
mod expiration_listener;
mod repository;
mod scheduler_client;
mod task_service;

use api::AppState;
use config::ConfigManager;
use expiration_listener::ExpirationListener;
use repository::{InMemoryTaskRepository, RedisTaskRepository, TaskRepository};
use scheduler_client::SchedulerClient;
use task_service::TaskService;

/// Command-line arguments for `taskd`.
#[derive(Parser, Debug)]
#[command(name = "taskd")]
#[command(about = "Task lifecycle service: HTTP API, event processor, and expiration listener", long_about = None)]
struct CliArgs {
    /// Path to the service configuration file (taskd.toml), or a directory containing it.
    #[arg(value_name = "CONFIG_FILE")]
    config_path: PathBuf,
}

/// Everything the composition root needs to tear down on shutdown.
struct Running {
    event_worker_handles: Vec<JoinHandle<()>>,
    expiration_listener_handle: Option<JoinHandle<()>>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

async fn build_repository(config: &shared::config::ServiceConfig) -> Result<Arc<dyn TaskRepository>> {
    if config.in_memory_store {
        info!("using in-memory task repository (development mode)");
        return Ok(InMemoryTaskRepository::shared());
    }

    let writer_client = redis::Client::open(config.redis_write_url.clone())
        .context("invalid redis_write_url")?;
    let writer = ConnectionManager::new(writer_client)
        .await
        .context("failed to connect to redis writer")?;

    let reader = if config.redis_read_url.is_some() {
        let reader_client = redis::Client::open(config.redis_read_url().to_string())
            .context("invalid redis_read_url")?;
        ConnectionManager::new(reader_client)
            .await
            .context("failed to connect to redis reader")?
    } else {
        writer.clone()
    };

    let repository = RedisTaskRepository::new(
        reader,
        writer,
        config.redis_task_ttl_seconds,
        config.metadata_grace_seconds,
    )?;
    Ok(Arc::new(repository))
}

async fn run(config_manager: ConfigManager) -> Result<()> {
    let config = config_manager.config.clone();

    let repository = build_repository(&config).await?;
    repository
        .health_check()
        .await
        .context("task store unreachable at startup")?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let scheduler = SchedulerClient::new(&config)?;
    let (events, event_worker_handles) = event_processor::spawn(
        config.event_worker_count,
        Arc::clone(&repository),
        scheduler,
        shutdown_tx.clone(),
    );
    let task_service = Arc::new(TaskService::new(Arc::clone(&repository), events));

    let expiration_listener_handle = if config.in_memory_store {
        info!("in-memory store configured; expiration listener disabled");
        None
    } else {
        let client = redis::Client::open(config.redis_write_url.clone())
            .context("invalid redis_write_url")?;
        let db_index = client.get_connection_info().redis.db;
        let listener = ExpirationListener::new(client, db_index, Arc::clone(&repository));
        let shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            listener.run(shutdown_rx).await;
        }))
    };

    let state = AppState {
        task_service: Arc::clone(&task_service),
        operator_token: Arc::new(config.operator_token.clone()),
    };
    let app = api::create_router(state);

    let listen_address: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen_address '{}'", config.listen_address))?;

    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind TCP listener to {listen_address}"))?;
    info!(%listen_address, "taskd listening");

    let running = Running { event_worker_handles, expiration_listener_handle, shutdown_tx: shutdown_tx.clone() };

    let shutdown_signal = {
        let mut rx = shutdown_tx.subscribe();
        async move {
            let _ = rx.recv().await;
            info!("HTTP server received shutdown signal");
        }
    };

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal) => {
            result.context("HTTP server error")?;
        }
        _ = setup_shutdown_signal() => {
            info!("shutdown signal received, stopping taskd");
            let _ = running.shutdown_tx.send(());
        }
    }

    shutdown(running).await;
    Ok(())
}

async fn shutdown(running: Running) {
    let _ = running.shutdown_tx.send(());

    if let Some(handle) = running.expiration_listener_handle {
        if let Err(err) = handle.await {
            warn!(%err, "expiration listener task panicked");
        }
    }

    for handle in running.event_worker_handles {
        if let Err(err) = handle.await {
            warn!(%err, "event processor worker panicked");
        }
    }

    info!("taskd shutdown complete");
}

/// On Unix, handles SIGTERM and SIGINT; elsewhere falls back to Ctrl-C.
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());
        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                error!(%err, "failed to register signal handlers, falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "taskd.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("taskd=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!(config_path = %cli_args.config_path.display(), "taskd starting up");

    let config_manager = match ConfigManager::new(cli_args.config_path) {
        Ok(config_manager) => config_manager,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config_manager).await {
        error!(%err, "taskd exited with error");
        std::process::exit(1);
    }
    Ok(())
}
