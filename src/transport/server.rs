//! Embedded message broker.
//!
//! [`BrokerServer`] binds a TCP listener (port 0 by default, so the OS picks
//! a free ephemeral port), accepts clients and routes their publications
//! through a shared [`SubscriptionTable`]. Each client is served by a
//! single task that multiplexes its read loop and its write loop, so
//! aborting the accept task tears down every client with it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::protocol::{self, ClientOp, ServerInfo, ServerOp};
use super::sublist::{ClientId, SubscriptionTable};
use crate::domain::{TransportEndpoint, subject};
use crate::error::HarnessError;

/// How long a closing client gets to flush queued output.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Frames queued for one client before routed messages are dropped.
const CLIENT_QUEUE_CAPACITY: usize = 4096;

/// Tunables for an embedded broker.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; 0 lets the OS choose.
    pub port: u16,
    /// Largest accepted payload in bytes.
    pub max_payload: usize,
    /// Name reported in the `INFO` greeting.
    pub server_name: String,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_payload: 1024 * 1024,
            server_name: "pac-broker".to_string(),
        }
    }
}

#[derive(Debug)]
struct ServerState {
    table: Mutex<SubscriptionTable>,
    info: ServerInfo,
    next_client: AtomicU64,
}

impl ServerState {
    async fn route(&self, subject_name: &str, reply_to: Option<&str>, payload: &[u8]) -> usize {
        self.table.lock().await.route(subject_name, reply_to, payload)
    }
}

/// A running embedded broker.
///
/// Dropping the server aborts the accept loop and every client task, which
/// releases the listening port.
#[derive(Debug)]
pub struct BrokerServer {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl BrokerServer {
    /// Binds the listener and starts accepting clients.
    ///
    /// Returns once the bind has completed, so the endpoint is usable
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Bind`] if the address cannot be bound.
    pub async fn bind(options: BrokerOptions) -> Result<Self, HarnessError> {
        let addr = format!("{}:{}", options.host, options.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| HarnessError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| HarnessError::Bind { addr, source })?;

        let info = ServerInfo {
            server_id: uuid::Uuid::new_v4().simple().to_string(),
            server_name: options.server_name,
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: options.host,
            port: local_addr.port(),
            max_payload: options.max_payload,
            proto: 1,
        };
        let state = Arc::new(ServerState {
            table: Mutex::new(SubscriptionTable::new()),
            info,
            next_client: AtomicU64::new(1),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&state), shutdown_rx));

        tracing::info!(addr = %local_addr, "broker listening");
        Ok(Self {
            local_addr,
            state,
            shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    /// Address the broker is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint clients should dial.
    #[must_use]
    pub fn endpoint(&self) -> TransportEndpoint {
        TransportEndpoint::new(self.state.info.host.clone(), self.local_addr.port())
    }

    /// Number of live subscriptions across all clients.
    pub async fn subscription_count(&self) -> usize {
        self.state.table.lock().await.len()
    }

    /// Stops accepting, disconnects every client and releases the port.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        let Some(task) = self.accept_task.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = task.await
            && !e.is_cancelled()
        {
            tracing::warn!(error = %e, "broker accept loop ended abnormally");
        }
        tracing::info!(addr = %self.local_addr, "broker stopped");
    }
}

impl Drop for BrokerServer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let client_id = state.next_client.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%peer, client_id, "broker client connected");
                    clients.spawn(serve_client(stream, client_id, Arc::clone(&state)));
                }
                Err(e) => tracing::warn!(error = %e, "broker accept failed"),
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }
    drop(listener);
    clients.shutdown().await;
}

async fn serve_client(stream: TcpStream, client_id: ClientId, state: Arc<ServerState>) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
    let _ = tx.try_send(ServerOp::Info(state.info.clone()));

    let writer = write_loop(write_half, rx);
    tokio::pin!(writer);
    let mut reader = BufReader::new(read_half);

    let mut writer_done = false;
    let outcome = tokio::select! {
        res = read_loop(&mut reader, client_id, &tx, &state) => res,
        res = &mut writer => {
            writer_done = true;
            res
        }
    };

    if let Err(e) = &outcome {
        tracing::debug!(client_id, error = %e, "broker client error");
        if let HarnessError::Protocol(reason) = e {
            let _ = tx.try_send(ServerOp::Err(reason.clone()));
        }
    }

    let removed = state.table.lock().await.remove_client(client_id);
    tracing::debug!(client_id, removed, "broker client disconnected");
    drop(tx);
    if !writer_done {
        let _ = tokio::time::timeout(DRAIN_GRACE, &mut writer).await;
    }
}

async fn read_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    client_id: ClientId,
    tx: &mpsc::Sender<ServerOp>,
    state: &ServerState,
) -> Result<(), HarnessError> {
    let mut verbose = false;
    while let Some(op) = protocol::read_client_op(reader, state.info.max_payload).await? {
        let reply = match op {
            ClientOp::Connect(info) => {
                verbose = info.verbose;
                tracing::debug!(client_id, name = ?info.name, "broker client handshake");
                verbose.then_some(ServerOp::Ok)
            }
            ClientOp::Pub {
                subject: subject_name,
                reply_to,
                payload,
            } => match subject::validate_publish_subject(&subject_name) {
                Ok(()) => {
                    let n = state
                        .route(&subject_name, reply_to.as_deref(), &payload)
                        .await;
                    tracing::trace!(client_id, subject = %subject_name, deliveries = n, "routed");
                    verbose.then_some(ServerOp::Ok)
                }
                Err(_) => Some(ServerOp::Err("Invalid Subject".to_string())),
            },
            ClientOp::Sub {
                subject: pattern,
                queue,
                sid,
            } => match subject::validate_pattern(&pattern) {
                Ok(()) => {
                    state.table.lock().await.insert(
                        client_id,
                        sid,
                        &pattern,
                        queue.as_deref(),
                        tx.clone(),
                    );
                    verbose.then_some(ServerOp::Ok)
                }
                Err(_) => Some(ServerOp::Err("Invalid Subject".to_string())),
            },
            ClientOp::Unsub { sid, max } => {
                state.table.lock().await.unsubscribe(client_id, sid, max);
                verbose.then_some(ServerOp::Ok)
            }
            ClientOp::Ping => Some(ServerOp::Pong),
            ClientOp::Pong => None,
        };
        if let Some(reply) = reply
            && tx.send(reply).await.is_err()
        {
            break;
        }
    }
    Ok(())
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<ServerOp>,
) -> Result<(), HarnessError> {
    while let Some(op) = rx.recv().await {
        writer.write_all(&op.encode()?).await?;
    }
    writer.shutdown().await?;
    Ok(())
}
