//! RedVault TCP Server
//!
//! Accepts connections and runs one task per client. Each client gets a
//! reader loop (decode → process) and a writer task that drains the
//! session's outbound queue, so pub/sub pushes from other sessions never
//! touch this connection's socket directly.

use crate::{
    aof::{Aof, DEFAULT_FSYNC_INTERVAL},
    db::Database,
    error::{RedVaultError, Result},
    protocol::{FrameReader, Value},
    session::{Session, SessionTable, DEFAULT_OUTBOUND_CAPACITY},
    store::Store,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncWriteExt, BufWriter},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::{broadcast, mpsc, Semaphore},
};
use tracing::{debug, error, info, warn};

/// RedVault server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub aof_path: String,
    pub max_connections: usize,
    pub fsync_interval_ms: u64,
    /// Values a session's outbound queue holds before pub/sub pushes to it
    /// are dropped
    pub outbound_capacity: usize,
    /// Drop an incomplete trailing AOF entry instead of refusing to start
    pub aof_load_truncated: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7000".to_string(),
            aof_path: "database.aof".to_string(),
            max_connections: 1000,
            fsync_interval_ms: DEFAULT_FSYNC_INTERVAL.as_millis() as u64,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            aof_load_truncated: false,
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn fsync_interval(&self) -> Duration {
        Duration::from_millis(self.fsync_interval_ms.max(1))
    }
}

/// RedVault TCP server
pub struct RedVaultServer {
    config: ServerConfig,
    db: Arc<Database>,
    aof: Arc<Aof>,
    sessions: Arc<SessionTable>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RedVaultServer {
    /// Create a new server instance, replaying the AOF into memory
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let aof = Arc::new(Aof::open(&config.aof_path)?);
        let db = Arc::new(Database::with_aof(Arc::clone(&aof)));

        info!(path = %config.aof_path, "loading AOF");
        db.restore_from_aof(config.aof_load_truncated).await?;
        info!(
            keys = db.store().len().await,
            hashes = db.store().hash_len().await,
            "state restored"
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            db,
            aof,
            sessions: Arc::new(SessionTable::new()),
            shutdown_tx,
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve clients on an already-bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "RedVault server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let fsync = self
            .aof
            .spawn_fsync_task(self.config.fsync_interval(), self.shutdown_tx.subscribe());
        let permits = Arc::new(Semaphore::new(self.config.max_connections));
        let outbound_capacity = self.config.outbound_capacity.max(1);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                                warn!(peer = %addr, "connection limit reached, rejecting client");
                                tokio::spawn(reject(stream));
                                continue;
                            };

                            let db = Arc::clone(&self.db);
                            let sessions = Arc::clone(&self.sessions);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                let _permit = permit;
                                let result = Self::handle_client(
                                    stream,
                                    addr,
                                    outbound_capacity,
                                    db,
                                    sessions,
                                    shutdown_rx,
                                )
                                .await;
                                if let Err(e) = result {
                                    warn!(peer = %addr, error = %e, "client connection closed with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping server");
                    break;
                }
            }
        }

        if let Err(e) = fsync.await {
            error!(error = %e, "fsync task failed");
        }

        info!("server stopped");
        Ok(())
    }

    /// Handle a single client connection
    async fn handle_client(
        stream: TcpStream,
        peer: SocketAddr,
        outbound_capacity: usize,
        db: Arc<Database>,
        sessions: Arc<SessionTable>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);

        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        let writer = tokio::spawn(write_outbound(write_half, outbound_rx));

        let id = peer.to_string();
        let mut session = Session::new(id.clone(), outbound_tx);
        sessions.register(&id).await;
        info!(peer = %id, "client connected");

        let result = loop {
            let frame = tokio::select! {
                frame = reader.read_value() => frame,
                _ = session.closed() => break Ok(()),
                _ = shutdown_rx.recv() => {
                    debug!(peer = %id, "closing client connection for shutdown");
                    break Ok(());
                }
            };

            match frame {
                Ok(Some(frame)) => {
                    let reply = db.process(frame, Some(&mut session)).await;
                    if !session.push(reply).await {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(RedVaultError::Protocol(message)) => {
                    session
                        .push(Value::error(format!("ERR Protocol error: {}", message)))
                        .await;
                    break Err(RedVaultError::Protocol(message));
                }
                Err(e) => break Err(e),
            }
        };

        db.pubsub().unsubscribe_all(&mut session).await;
        drop(session);

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %id, error = %e, "writer stopped"),
            Err(e) => error!(peer = %id, error = %e, "writer task failed"),
        }

        let connected_for = sessions.deregister(&id).await.unwrap_or_default();
        info!(peer = %id, ?connected_for, "client disconnected");

        result
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send(()).map_err(|_| {
            RedVaultError::Server("Failed to send shutdown signal".to_string())
        })?;
        Ok(())
    }
}

/// Drain a session's outbound queue onto its socket.
///
/// Values already queued are written together before one flush.
async fn write_outbound(
    write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Value>,
) -> Result<()> {
    let mut writer = BufWriter::new(write_half);

    while let Some(value) = outbound_rx.recv().await {
        writer.write_all(&value.to_bytes()).await?;
        while let Ok(value) = outbound_rx.try_recv() {
            writer.write_all(&value.to_bytes()).await?;
        }
        writer.flush().await?;
    }

    let _ = writer.shutdown().await;
    Ok(())
}

async fn reject(mut stream: TcpStream) {
    let reply = Value::error("ERR max number of clients reached").to_bytes();
    let _ = stream.write_all(&reply).await;
    let _ = stream.shutdown().await;
}
