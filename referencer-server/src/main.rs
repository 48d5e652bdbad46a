//! Referencer collaboration server.
//!
//! Serves Yjs clients over WebSocket at `ws://HOST:PORT/<room>?role=<role>`,
//! keeping document state in RocksDB (`DB_DIR`) and a JSON archive
//! (`ARCHIVE_DIR`). Ctrl-C flushes every resident room before exiting.

use log::info;

use referencer_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "Starting referencer-server on {} (debounce {:?}, flush every {:?}, fast tier limit {} bytes)",
        config.bind_addr,
        config.coordinator.debounce,
        config.coordinator.flush_interval,
        config.coordinator.fast_tier_limit
    );

    let server = SyncServer::with_storage(config)?;
    let coordinator = server.coordinator().clone();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, flushing rooms"),
    }

    coordinator.shutdown().await;
    let stats = coordinator.stats();
    info!(
        "Stopped: {} connections served, {} fast saves, {} slow saves, {} save failures",
        stats.connections_opened,
        stats.fast_saves,
        stats.slow_saves,
        stats.fast_save_failures + stats.slow_save_failures
    );
    Ok(())
}
