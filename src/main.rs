//! tabrelay — wires up whichever role (`TABRELAY_ROLE`) this process plays:
//! Endpoint Gateway or Tool-Server Client. Both roles contend for the relay
//! fabric's well-known port on startup (§4.1); whichever loses the bind race
//! runs as a relay client instead, transparently to the role's own logic.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tabrelay::config::{AppConfig, Role};
use tabrelay::coordination::tab_lock::TabLockTable;
use tabrelay::endpoint::holder::ConnectionHolder;
use tabrelay::endpoint::registry::ResourceRegistry;
use tabrelay::endpoint::worker::Worker;
use tabrelay::relay::server::RelayServerImpl;
use tabrelay::relay::traits::RelayError;
use tabrelay::time_provider::production_time_provider;
use tabrelay::tool_server::client::ToolServerClient;
use tabrelay::tool_server::operation_manager::OperationManager;
use tabrelay::tool_server::persistence::OperationStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;
    tabrelay::observability::init_tracing(&config.log_level, config.log_json);

    info!(role = ?config.role, port = config.relay.port, "starting tabrelay");

    let time_provider = production_time_provider();
    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let port = try_become_relay(&config, time_provider.clone(), shutdown.clone()).await;

    match config.role {
        Role::Endpoint => run_endpoint(&config, port, time_provider, shutdown).await,
        Role::ToolServer => run_tool_server(&config, port, time_provider, shutdown).await,
    }
}

/// Attempts to bind and serve the relay fabric on a background task. On
/// [`RelayError::LostElection`] another process already holds the port, so
/// this process proceeds purely as a client. Returns the port to dial
/// either way (the configured port, since losing the election means someone
/// else is listening there).
async fn try_become_relay(
    config: &AppConfig,
    time_provider: tabrelay::time_provider::SharedTimeProvider,
    shutdown: CancellationToken,
) -> u16 {
    let server = RelayServerImpl::new(config.relay.clone(), time_provider);
    match server.bind().await {
        Ok(listener) => {
            let port = listener
                .local_addr()
                .map(|addr| addr.port())
                .unwrap_or(config.relay.port);
            info!(port, "won relay election, serving relay fabric");
            tokio::spawn(async move {
                if let Err(error) = server.serve(listener, shutdown).await {
                    warn!(%error, "relay fabric exited with an error");
                }
            });
            port
        }
        Err(RelayError::LostElection { port }) => {
            info!(port, "another process is the relay, connecting as a client");
            port
        }
        Err(error) => {
            warn!(%error, "relay bind failed fatally, assuming configured port is hosted elsewhere");
            config.relay.port
        }
    }
}

async fn run_endpoint(
    config: &AppConfig,
    port: u16,
    time_provider: tabrelay::time_provider::SharedTimeProvider,
    shutdown: CancellationToken,
) -> Result<()> {
    let registry = Arc::new(ResourceRegistry::new(TabLockTable::new(
        config.tab_lock.max_hold,
        time_provider.clone(),
    )));
    let (to_worker_tx, to_worker_rx) = mpsc::channel(config.relay.outbound_queue_capacity.as_usize());
    let (worker_ready_tx, worker_ready_rx) = mpsc::channel(1);
    let (outbound_tx, outbound_rx) = mpsc::channel(config.relay.outbound_queue_capacity.as_usize());

    let worker = Worker::new(registry, outbound_tx.clone());
    let worker_handle = tokio::spawn(worker.run(to_worker_rx));
    let _ = worker_ready_tx.send(tabrelay::endpoint::holder::WorkerReady).await;

    let holder = ConnectionHolder::new(port, HashSet::new(), config.relay.outbound_queue_capacity, time_provider);
    let holder_handle = tokio::spawn(holder.run(worker_ready_rx, to_worker_tx, outbound_rx));

    shutdown.cancelled().await;
    worker_handle.abort();
    holder_handle.abort();
    Ok(())
}

async fn run_tool_server(
    config: &AppConfig,
    port: u16,
    time_provider: tabrelay::time_provider::SharedTimeProvider,
    shutdown: CancellationToken,
) -> Result<()> {
    let store = Arc::new(OperationStore::new(&config.data_dir));
    store.ensure_dir().await.context("preparing operation store")?;
    let manager = Arc::new(OperationManager::new(store));
    manager.recover().await.context("recovering operations from disk")?;

    let client = ToolServerClient::new(port, manager, time_provider, config.operation_manager);
    let run_handle = tokio::spawn(client.run());

    shutdown.cancelled().await;
    run_handle.abort();
    Ok(())
}

fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            shutdown.cancel();
        }
    });
}
