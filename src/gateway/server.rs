//! The gateway's HTTP server lifecycle.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::build_router;
use super::state::GatewayState;
use crate::error::HarnessError;
use crate::service::ManagedService;

/// How long `stop` waits for in-flight requests before aborting.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between connection probes in `wait_ready`.
const PROBE_INTERVAL: Duration = Duration::from_millis(20);

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; 0 asks the OS for a free one.
    pub port: u16,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            host: crate::config::DEFAULT_HOST.to_string(),
            port: 0,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// One PA's HTTP gateway, bound to its own ephemeral port.
#[derive(Debug)]
pub struct Gateway {
    name: String,
    options: GatewayOptions,
    state: GatewayState,
    running: Mutex<Option<Running>>,
}

impl Gateway {
    /// A gateway serving `state`; nothing is bound until `start`.
    #[must_use]
    pub fn new(state: GatewayState, options: GatewayOptions) -> Self {
        Self {
            name: format!("gateway-{}", state.pa.short()),
            options,
            state,
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bound address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|r| r.addr)
    }

    /// Bound port, once started.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|a| a.port())
    }

    /// `http://host:port`, once started.
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.local_addr().map(|addr| {
            let host = if addr.ip().is_unspecified() {
                crate::config::DEFAULT_HOST.to_string()
            } else {
                addr.ip().to_string()
            };
            format!("http://{host}:{}", addr.port())
        })
    }
}

#[async_trait]
impl ManagedService for Gateway {
    fn name(&self) -> &str {
        &self.name
    }

    /// Binds the listener and starts serving. Returns once the port is
    /// bound, so the gateway accepts connections immediately.
    async fn start(&self) -> Result<(), HarnessError> {
        if self.is_running() {
            return Err(HarnessError::AlreadyRunning(self.name.clone()));
        }
        let addr = format!("{}:{}", self.options.host, self.options.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| HarnessError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| HarnessError::Bind { addr, source })?;

        let app = build_router(self.state.clone(), self.options.request_timeout);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        *self.running() = Some(Running {
            addr: local_addr,
            shutdown,
            task,
        });
        tracing::info!(gateway = %self.name, addr = %local_addr, "gateway listening");
        Ok(())
    }

    async fn stop(&self) -> Result<(), HarnessError> {
        let running = self.running().take();
        let Some(Running {
            addr,
            shutdown,
            mut task,
        }) = running
        else {
            return Ok(());
        };
        let _ = shutdown.send(());
        let outcome = match tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(HarnessError::Io(e)),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(HarnessError::WorkerPanicked {
                name: self.name.clone(),
                message: e.to_string(),
            }),
            Err(_) => {
                tracing::warn!(gateway = %self.name, "gateway did not drain in time, aborting");
                task.abort();
                Ok(())
            }
        };
        tracing::info!(gateway = %self.name, %addr, "gateway stopped");
        outcome
    }

    fn endpoint(&self) -> Option<String> {
        self.base_url()
    }

    fn is_running(&self) -> bool {
        self.running().is_some()
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<(), HarnessError> {
        let probe = async {
            loop {
                if let Some(addr) = self.local_addr()
                    && TcpStream::connect(addr).await.is_ok()
                {
                    return;
                }
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, probe)
            .await
            .map_err(|_| HarnessError::ReadyTimeout {
                name: self.name.clone(),
                timeout,
            })
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(running) = self.running().take() {
            running.task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::broker::{BrokerConnection, ConnectOptions};
    use crate::domain::PaId;
    use crate::transport::{BrokerOptions, BrokerServer};

    async fn gateway() -> (BrokerServer, Gateway) {
        let Ok(server) = BrokerServer::bind(BrokerOptions::default()).await else {
            panic!("bind failed");
        };
        let Ok(broker) = BrokerConnection::connect(&server.endpoint(), ConnectOptions::default()).await
        else {
            panic!("connect failed");
        };
        let state = GatewayState {
            pa: PaId::new(),
            rank: "test".to_string(),
            broker: Arc::clone(&broker),
        };
        (server, Gateway::new(state, GatewayOptions::default()))
    }

    #[tokio::test]
    async fn start_binds_an_ephemeral_port_and_stop_releases_it() {
        let (_server, gw) = gateway().await;
        assert!(gw.base_url().is_none());
        assert!(gw.start().await.is_ok());
        assert!(gw.is_running());
        let Some(addr) = gw.local_addr() else {
            panic!("address should be known");
        };
        assert_ne!(addr.port(), 0);
        assert_eq!(
            gw.base_url(),
            Some(format!("http://127.0.0.1:{}", addr.port()))
        );
        assert!(gw.wait_ready(Duration::from_secs(1)).await.is_ok());

        assert!(gw.stop().await.is_ok());
        assert!(!gw.is_running());
        assert!(gw.stop().await.is_ok(), "stop is idempotent");
        assert!(TcpListener::bind(addr).await.is_ok(), "port released");
    }

    #[tokio::test]
    async fn two_gateways_get_distinct_ports() {
        let (_s1, a) = gateway().await;
        let (_s2, b) = gateway().await;
        assert!(a.start().await.is_ok());
        assert!(b.start().await.is_ok());
        assert_ne!(a.port(), b.port());
        let _ = a.stop().await;
        let _ = b.stop().await;
    }

    #[tokio::test]
    async fn never_started_gateway_is_not_ready() {
        let (_server, gw) = gateway().await;
        let result = gw.wait_ready(Duration::from_millis(100)).await;
        assert!(result.is_err_and(|e| e.is_timeout()));
    }
}
