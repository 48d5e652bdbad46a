//! WebSocket front end for the coordinator.
//!
//! ```text
//! ws://host:port/<room>?role=<role>
//! GET /health          ─► JSON status, connection closed
//!
//! TCP accept ─► peek for /health ─► upgrade (capture path + query) ─► open_connection(room, role)
//!                                                      │
//!     ┌────────────────────────────────────────────────┘
//!     ▼
//!   select! ─┬─ socket frame   ─► on_message   (binary only, in order)
//!            └─ outbound queue ─► socket
//!   close / error / queue ended ─► on_close (once)
//! ```
//!
//! Token checks happen upstream; whatever `role` arrives here is trusted.
//! The room is the whole path after the leading `/`, so `/notes/ch-3`
//! and `/notes` are different rooms. `/health` is never a room.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::access::Role;
use crate::config::ServerConfig;
use crate::coordinator::{Connection, Coordinator};
use crate::registry::Outbound;
use crate::storage::{ArchiveSlowStore, MemoryFastStore, MemorySlowStore, RocksFastStore, StoreConfig, StoreError};

/// Room used when the request path names none.
pub const DEFAULT_ROOM: &str = "default";

/// Request line prefix answered with the health report.
const HEALTH_REQUEST: &[u8] = b"GET /health";
const HEALTH_PEEK_ATTEMPTS: usize = 50;
const HEALTH_PEEK_RETRY: Duration = Duration::from_millis(10);
/// Largest request head read from a health check.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Static part of the health report.
#[derive(Debug, Clone)]
struct Health {
    /// Storage backend label: `rocksdb`, `memory` or `custom`
    persistence: &'static str,
    db_dir: String,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    coordinator: Arc<Coordinator>,
    health: Arc<Health>,
}

impl SyncServer {
    /// Serve an existing coordinator. Health reports persistence `custom`.
    pub fn new(config: ServerConfig, coordinator: Arc<Coordinator>) -> Self {
        Self::labelled(config, coordinator, "custom")
    }

    fn labelled(config: ServerConfig, coordinator: Arc<Coordinator>, persistence: &'static str) -> Self {
        let health = Arc::new(Health {
            persistence,
            db_dir: config.storage_path.display().to_string(),
        });
        Self {
            config,
            coordinator,
            health,
        }
    }

    /// RocksDB fast tier at `storage_path`, JSON archive at `archive_path`.
    pub fn with_storage(config: ServerConfig) -> Result<Self, StoreError> {
        let fast = RocksFastStore::open(StoreConfig {
            path: config.storage_path.clone(),
            ..StoreConfig::default()
        })?;
        let slow = ArchiveSlowStore::open(config.archive_path.clone())?;
        log::info!(
            "Storage: fast tier {}, slow tier {}",
            fast.path().display(),
            slow.dir().display()
        );
        let coordinator = Coordinator::new(config.coordinator.clone(), Arc::new(fast), Arc::new(slow));
        Ok(Self::labelled(config, Arc::new(coordinator), "rocksdb"))
    }

    /// Both tiers held in process memory; nothing survives a restart.
    pub fn in_memory(config: ServerConfig) -> Self {
        let coordinator = Coordinator::new(
            config.coordinator.clone(),
            Arc::new(MemoryFastStore::new()),
            Arc::new(MemorySlowStore::new()),
        );
        Self::labelled(config, Arc::new(coordinator), "memory")
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("Accept failed: {e}");
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let coordinator = self.coordinator.clone();
            let health = self.health.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(coordinator, health, stream, addr).await {
                    log::warn!("Connection from {addr} ended with error: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    coordinator: Arc<Coordinator>,
    health: Arc<Health>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), BoxError> {
    if is_health_request(&stream).await? {
        log::debug!("Health check from {addr}");
        return respond_health(&coordinator, &health, stream).await;
    }

    let mut target: Option<Uri> = None;
    let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        target = Some(req.uri().clone());
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, capture).await?;

    let (document_id, role) = match &target {
        Some(uri) => parse_target(uri.path(), uri.query()),
        None => (DEFAULT_ROOM.to_string(), Role::Viewer),
    };
    log::debug!("Upgrade from {addr} for room {document_id} as {role}");

    let (conn, outbound) = coordinator.open_connection(&document_id, role).await?;
    let result = pump(&coordinator, &conn, ws_stream, outbound).await;
    coordinator.on_close(&conn).await;
    result
}

/// Peek at the request line without consuming it. Waits a bounded time
/// for slow senders; anything that is not `GET /health` followed by a
/// space or a query goes on to the WebSocket handshake.
async fn is_health_request(stream: &TcpStream) -> std::io::Result<bool> {
    let mut buf = [0u8; HEALTH_REQUEST.len() + 1];
    for _ in 0..HEALTH_PEEK_ATTEMPTS {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        let common = n.min(HEALTH_REQUEST.len());
        if buf[..common] != HEALTH_REQUEST[..common] {
            return Ok(false);
        }
        if n == buf.len() {
            return Ok(matches!(buf[HEALTH_REQUEST.len()], b' ' | b'?'));
        }
        tokio::time::sleep(HEALTH_PEEK_RETRY).await;
    }
    Ok(false)
}

async fn respond_health(
    coordinator: &Coordinator,
    health: &Health,
    mut stream: TcpStream,
) -> Result<(), BoxError> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < MAX_REQUEST_HEAD {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }

    let body = serde_json::json!({
        "status": "ok",
        "persistence": health.persistence,
        "dbDir": health.db_dir,
        "rooms": coordinator.room_count().await,
    })
    .to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Shuttle frames until either side goes away.
async fn pump(
    coordinator: &Coordinator,
    conn: &Connection,
    ws_stream: WebSocketStream<TcpStream>,
    mut outbound: mpsc::Receiver<Outbound>,
) -> Result<(), BoxError> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Binary(data))) => coordinator.on_message(conn, &data).await,
                Some(Ok(Message::Ping(data))) => ws_sender.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => break,
                // Text and pong frames carry nothing for us
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("WebSocket error on connection {}: {e}", conn.id());
                    break;
                }
            },

            msg = outbound.recv() => match msg {
                Some(bytes) => ws_sender.send(Message::Binary(bytes.to_vec().into())).await?,
                // Room let go of us (coordinator shutdown)
                None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    Ok(())
}

/// Room name from the path minus its leading `/`, role from the `role`
/// query parameter.
pub fn parse_target(path: &str, query: Option<&str>) -> (String, Role) {
    let room = match path.strip_prefix('/').unwrap_or(path) {
        "" => DEFAULT_ROOM.to_string(),
        room => room.to_string(),
    };

    let role = query
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "role")
        .map(|(_, value)| value);

    (room, Role::parse(role))
}
