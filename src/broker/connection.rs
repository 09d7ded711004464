//! Client connection to a transport endpoint.
//!
//! A [`BrokerConnection`] runs two background tasks: a writer draining an
//! outbound queue of [`ClientOp`]s (so `publish` never blocks and keeps
//! per-subject order) and a reader dispatching `MSG` frames to the
//! matching [`Subscription`] buffers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::subscription::Subscription;
use crate::config::DEFAULT_SUBSCRIPTION_CAPACITY;
use crate::domain::subject::{self, WILDCARD_ALL};
use crate::domain::{Message, TransportEndpoint};
use crate::error::HarnessError;
use crate::transport::protocol::{self, ClientOp, ConnectInfo, ServerInfo, ServerOp};

/// Options for [`BrokerConnection::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Client name shown in broker logs.
    pub name: String,
    /// Buffered messages per subscription.
    pub subscription_capacity: usize,
    /// Deadline for the `INFO` / `CONNECT` / `PING` handshake and flushes.
    pub request_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            name: "pac-harness".to_string(),
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectOptions {
    /// Options with the given client name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub(super) struct SubEntry {
    pub(super) sender: mpsc::Sender<Message>,
    dropped: u64,
}

impl SubEntry {
    pub(super) const fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender, dropped: 0 }
    }
}

/// State shared between the connection, its reader task and its
/// subscriptions.
#[derive(Debug, Default)]
pub(super) struct Shared {
    pub(super) subs: Mutex<HashMap<u64, SubEntry>>,
    pub(super) observer: Mutex<Option<u64>>,
    pongs: Mutex<VecDeque<oneshot::Sender<()>>>,
    connected: AtomicBool,
    dropped: AtomicU64,
}

impl Shared {
    pub(super) fn subs(&self) -> MutexGuard<'_, HashMap<u64, SubEntry>> {
        self.subs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn observer(&self) -> MutexGuard<'_, Option<u64>> {
        self.observer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pongs(&self) -> MutexGuard<'_, VecDeque<oneshot::Sender<()>>> {
        self.pongs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, sid: u64, msg: Message) {
        let mut subs = self.subs();
        let Some(entry) = subs.get_mut(&sid) else {
            return;
        };
        match entry.sender.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                entry.dropped += 1;
                // Warn once per subscription.
                if entry.dropped == 1 {
                    tracing::warn!(sid, subject = %msg.subject, "slow consumer, dropping messages");
                } else {
                    tracing::debug!(sid, subject = %msg.subject, dropped = entry.dropped, "message dropped");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                subs.remove(&sid);
            }
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.subs().clear();
        self.pongs().clear();
    }
}

/// Snapshot of a connection's state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    /// Client name.
    pub name: String,
    /// Endpoint the connection dialled.
    pub endpoint: String,
    /// Whether the socket is still up.
    pub connected: bool,
    /// Live subscriptions.
    pub subscriptions: usize,
    /// Messages discarded because a subscription buffer was full.
    pub dropped_messages: u64,
}

/// A connected broker client.
///
/// Owned exclusively by the context that opened it (typically behind an
/// `Arc` shared with that context's runners and gateway). [`close`] must
/// be called exactly once; later calls are no-ops and `Drop` aborts the
/// background tasks if it never was.
///
/// [`close`]: BrokerConnection::close
#[derive(Debug)]
pub struct BrokerConnection {
    name: String,
    endpoint: TransportEndpoint,
    server_info: ServerInfo,
    options: ConnectOptions,
    outbound: mpsc::UnboundedSender<ClientOp>,
    shared: Arc<Shared>,
    next_sid: AtomicU64,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerConnection {
    /// Dials `endpoint` and completes the protocol handshake.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Connect`] if the socket cannot be opened,
    /// [`HarnessError::Protocol`] if the peer does not greet with `INFO`,
    /// and [`HarnessError::ReadyTimeout`] if the handshake stalls.
    pub async fn connect(
        endpoint: &TransportEndpoint,
        options: ConnectOptions,
    ) -> Result<Arc<Self>, HarnessError> {
        let stream = TcpStream::connect(endpoint.authority())
            .await
            .map_err(|source| HarnessError::Connect {
                endpoint: endpoint.url(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let handshake = handshake(&mut reader, &mut write_half, &options.name);
        let server_info = tokio::time::timeout(options.request_timeout, handshake)
            .await
            .map_err(|_| HarnessError::ReadyTimeout {
                name: format!("handshake with {endpoint}"),
                timeout: options.request_timeout,
            })??;

        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::Release);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_loop(
            reader,
            server_info.max_payload,
            Arc::clone(&shared),
            outbound.clone(),
        ));
        let writer_task = tokio::spawn(write_loop(write_half, outbound_rx, Arc::clone(&shared)));

        tracing::debug!(client = %options.name, %endpoint, server = %server_info.server_id, "broker connection open");
        Ok(Arc::new(Self {
            name: options.name.clone(),
            endpoint: endpoint.clone(),
            server_info,
            options,
            outbound,
            shared,
            next_sid: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(vec![reader_task, writer_task]),
        }))
    }

    /// Client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint this connection dialled.
    #[must_use]
    pub const fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }

    /// The broker's `INFO` greeting.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns `true` while the socket is up and `close` has not been called.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.shared.connected.load(Ordering::Acquire)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            name: self.name.clone(),
            endpoint: self.endpoint.url(),
            connected: self.is_connected(),
            subscriptions: self.shared.subs().len(),
            dropped_messages: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    fn ensure_open(&self) -> Result<(), HarnessError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(HarnessError::ConnectionClosed)
        }
    }

    pub(super) fn send(&self, op: ClientOp) -> Result<(), HarnessError> {
        self.outbound
            .send(op)
            .map_err(|_| HarnessError::ConnectionClosed)
    }

    /// Publishes `payload` on `subject_name`.
    ///
    /// Fire-and-forget: returns once the frame is queued. Frames from one
    /// connection reach the broker in the order they were queued.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] for wildcard or malformed
    /// subjects and oversized payloads, and
    /// [`HarnessError::ConnectionClosed`] if the connection is down.
    pub fn publish(&self, subject_name: &str, payload: impl Into<Vec<u8>>) -> Result<(), HarnessError> {
        self.publish_with_reply(subject_name, None, payload)
    }

    /// Publishes with a reply subject.
    ///
    /// # Errors
    ///
    /// Same as [`BrokerConnection::publish`].
    pub fn publish_with_reply(
        &self,
        subject_name: &str,
        reply_to: Option<&str>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), HarnessError> {
        subject::validate_publish_subject(subject_name)?;
        if let Some(reply) = reply_to {
            subject::validate_publish_subject(reply)?;
        }
        let payload = payload.into();
        if payload.len() > self.server_info.max_payload {
            return Err(HarnessError::Validation(format!(
                "payload of {} bytes exceeds broker maximum {}",
                payload.len(),
                self.server_info.max_payload
            )));
        }
        self.ensure_open()?;
        self.send(ClientOp::Pub {
            subject: subject_name.to_string(),
            reply_to: reply_to.map(str::to_string),
            payload,
        })
    }

    /// Serializes `value` as JSON and publishes it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Json`] if serialization fails, otherwise as
    /// [`BrokerConnection::publish`].
    pub fn publish_json<T: Serialize>(&self, subject_name: &str, value: &T) -> Result<(), HarnessError> {
        self.publish(subject_name, serde_json::to_vec(value)?)
    }

    /// Round-trips a `PING` so every frame queued before the call has been
    /// processed by the broker.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ConnectionClosed`] if the connection drops
    /// first and [`HarnessError::ReadyTimeout`] if the broker does not
    /// answer within the request timeout.
    pub async fn flush(&self) -> Result<(), HarnessError> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.shared.pongs().push_back(tx);
        self.send(ClientOp::Ping)?;
        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HarnessError::ConnectionClosed),
            Err(_) => Err(HarnessError::ReadyTimeout {
                name: format!("{} flush", self.name),
                timeout: self.options.request_timeout,
            }),
        }
    }

    /// Subscribes to a subject pattern.
    ///
    /// Returns after the broker has registered the subscription, so every
    /// message published afterwards is delivered to it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] for malformed patterns and the
    /// errors of [`BrokerConnection::flush`].
    pub async fn subscribe(self: &Arc<Self>, pattern: &str) -> Result<Subscription, HarnessError> {
        self.subscribe_inner(pattern, None).await
    }

    /// Subscribes as a member of `queue`; each message goes to one member.
    ///
    /// # Errors
    ///
    /// Same as [`BrokerConnection::subscribe`].
    pub async fn queue_subscribe(
        self: &Arc<Self>,
        pattern: &str,
        queue: &str,
    ) -> Result<Subscription, HarnessError> {
        if queue.is_empty() || queue.chars().any(char::is_whitespace) {
            return Err(HarnessError::Validation(format!(
                "invalid queue group {queue:?}"
            )));
        }
        self.subscribe_inner(pattern, Some(queue)).await
    }

    /// Opens the connection's single wildcard observation subscription,
    /// which receives every subject published after it is established.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] if an observer is already
    /// active on this connection, otherwise as
    /// [`BrokerConnection::subscribe`].
    pub async fn observe(self: &Arc<Self>) -> Result<Subscription, HarnessError> {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        {
            let mut observer = self.shared.observer();
            if observer.is_some() {
                return Err(HarnessError::Validation(format!(
                    "{} already has a wildcard observer",
                    self.name
                )));
            }
            *observer = Some(sid);
        }
        let result = self.register(sid, WILDCARD_ALL, None).await;
        if result.is_err() {
            let mut observer = self.shared.observer();
            if *observer == Some(sid) {
                *observer = None;
            }
        }
        result
    }

    async fn subscribe_inner(
        self: &Arc<Self>,
        pattern: &str,
        queue: Option<&str>,
    ) -> Result<Subscription, HarnessError> {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        self.register(sid, pattern, queue).await
    }

    async fn register(
        self: &Arc<Self>,
        sid: u64,
        pattern: &str,
        queue: Option<&str>,
    ) -> Result<Subscription, HarnessError> {
        subject::validate_pattern(pattern)?;
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(self.options.subscription_capacity.max(1));
        self.shared.subs().insert(sid, SubEntry::new(tx));
        let subscription = Subscription::new(sid, pattern, queue, rx, Arc::clone(self));
        self.send(ClientOp::Sub {
            subject: pattern.to_string(),
            queue: queue.map(str::to_string),
            sid,
        })?;
        self.flush().await?;
        tracing::debug!(client = %self.name, sid, subject = pattern, ?queue, "subscribed");
        Ok(subscription)
    }

    pub(super) fn forget(&self, sid: u64) {
        self.shared.subs().remove(&sid);
        let mut observer = self.shared.observer();
        if *observer == Some(sid) {
            *observer = None;
        }
    }

    /// Releases every subscription, then the socket.
    ///
    /// Only the first call does anything.
    ///
    /// # Errors
    ///
    /// Returns the flush error if the broker could not confirm the
    /// unsubscriptions; the socket is released regardless.
    pub async fn close(&self) -> Result<(), HarnessError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let sids: Vec<u64> = self.shared.subs().drain().map(|(sid, _)| sid).collect();
        *self.shared.observer() = None;
        for sid in &sids {
            let _ = self.send(ClientOp::Unsub { sid: *sid, max: None });
        }

        let mut outcome = Ok(());
        if self.shared.connected.load(Ordering::Acquire) && !sids.is_empty() {
            let (tx, rx) = oneshot::channel();
            self.shared.pongs().push_back(tx);
            if self.send(ClientOp::Ping).is_ok() {
                outcome = match tokio::time::timeout(self.options.request_timeout, rx).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(HarnessError::ConnectionClosed),
                    Err(_) => Err(HarnessError::ReadyTimeout {
                        name: format!("{} close", self.name),
                        timeout: self.options.request_timeout,
                    }),
                };
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        self.shared.disconnect();
        tracing::debug!(client = %self.name, released = sids.len(), "broker connection closed");
        outcome
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}

async fn handshake(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    name: &str,
) -> Result<ServerInfo, HarnessError> {
    let Some(ServerOp::Info(info)) = protocol::read_server_op(reader, usize::MAX).await? else {
        return Err(HarnessError::Protocol(
            "expected INFO greeting from broker".to_string(),
        ));
    };

    let connect = ClientOp::Connect(ConnectInfo {
        verbose: false,
        pedantic: false,
        name: Some(name.to_string()),
        lang: "rust".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    writer.write_all(&connect.encode()?).await?;
    writer.write_all(&ClientOp::Ping.encode()?).await?;

    loop {
        match protocol::read_server_op(reader, info.max_payload).await? {
            Some(ServerOp::Pong) => return Ok(info),
            Some(ServerOp::Err(reason)) => {
                return Err(HarnessError::Protocol(format!(
                    "broker rejected handshake: {reason}"
                )));
            }
            Some(_) => {}
            None => return Err(HarnessError::ConnectionClosed),
        }
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    max_payload: usize,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<ClientOp>,
) {
    loop {
        match protocol::read_server_op(&mut reader, max_payload).await {
            Ok(Some(ServerOp::Msg {
                subject: subject_name,
                sid,
                reply_to,
                payload,
            })) => shared.deliver(sid, Message::new(subject_name, reply_to, payload)),
            Ok(Some(ServerOp::Ping)) => {
                let _ = outbound.send(ClientOp::Pong);
            }
            Ok(Some(ServerOp::Pong)) => {
                if let Some(waiter) = shared.pongs().pop_front() {
                    let _ = waiter.send(());
                }
            }
            Ok(Some(ServerOp::Err(reason))) => {
                tracing::warn!(%reason, "broker reported an error");
            }
            Ok(Some(ServerOp::Info(_) | ServerOp::Ok)) => {}
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "broker connection read failed");
                break;
            }
        }
    }
    shared.disconnect();
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ClientOp>,
    shared: Arc<Shared>,
) {
    while let Some(op) = rx.recv().await {
        let bytes = match op.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unencodable frame");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            tracing::warn!(error = %e, "broker connection write failed");
            shared.disconnect();
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::transport::server::{BrokerOptions, BrokerServer};

    const WAIT: Duration = Duration::from_secs(2);

    async fn broker() -> BrokerServer {
        let Ok(server) = BrokerServer::bind(BrokerOptions::default()).await else {
            panic!("bind failed");
        };
        server
    }

    async fn client(server: &BrokerServer, name: &str) -> Arc<BrokerConnection> {
        let Ok(conn) = BrokerConnection::connect(&server.endpoint(), ConnectOptions::named(name)).await
        else {
            panic!("connect failed");
        };
        conn
    }

    async fn next(sub: &mut Subscription) -> Message {
        let Ok(Some(msg)) = tokio::time::timeout(WAIT, sub.recv()).await else {
            panic!("no message on {}", sub.subject());
        };
        msg
    }

    #[tokio::test]
    async fn full_buffer_drops_and_counts_per_subscription() {
        let server = broker().await;
        let options = ConnectOptions {
            subscription_capacity: 1,
            ..ConnectOptions::named("slow")
        };
        let Ok(conn) = BrokerConnection::connect(&server.endpoint(), options).await else {
            panic!("connect failed");
        };
        let Ok(mut sub) = conn.subscribe("flood").await else {
            panic!("subscribe failed");
        };
        for m in ["m1", "m2", "m3"] {
            assert!(conn.publish("flood", m).is_ok());
        }
        assert!(conn.flush().await.is_ok());

        assert_eq!(conn.stats().dropped_messages, 2);
        let per_sub = conn.shared.subs().get(&sub.sid()).map(|e| e.dropped);
        assert_eq!(per_sub, Some(2));
        assert_eq!(next(&mut sub).await.text(), "m1");
        assert!(conn.is_connected(), "a slow subscription never closes the connection");
    }

    #[tokio::test]
    async fn publish_subscribe_round_trip() {
        let server = broker().await;
        let conn = client(&server, "t").await;
        assert!(conn.is_connected());
        assert_eq!(conn.server_info().port, server.local_addr().port());

        let Ok(mut sub) = conn.subscribe("test-subject").await else {
            panic!("subscribe failed");
        };
        for m in ["message_1", "message_2"] {
            assert!(conn.publish("test-subject", m).is_ok());
        }
        assert_eq!(next(&mut sub).await.text(), "message_1");
        assert_eq!(next(&mut sub).await.text(), "message_2");
    }

    #[tokio::test]
    async fn per_subject_order_is_preserved() {
        let server = broker().await;
        let publisher = client(&server, "pub").await;
        let consumer = client(&server, "sub").await;
        let Ok(mut sub) = consumer.subscribe("ordered").await else {
            panic!("subscribe failed");
        };
        for i in 0..200 {
            assert!(publisher.publish("ordered", i.to_string()).is_ok());
        }
        for i in 0..200 {
            assert_eq!(next(&mut sub).await.text(), i.to_string());
        }
    }

    #[tokio::test]
    async fn observer_sees_any_subject_but_no_backlog() {
        let server = broker().await;
        let conn = client(&server, "obs").await;
        assert!(conn.publish("before.observer", "old").is_ok());
        assert!(conn.flush().await.is_ok());

        let Ok(mut observer) = conn.observe().await else {
            panic!("observe failed");
        };
        assert!(conn.publish("any.subject.here", "test-data").is_ok());
        let msg = next(&mut observer).await;
        assert_eq!(msg.subject, "any.subject.here");
        assert_eq!(msg.text(), "test-data");
        assert!(observer.try_recv().is_none());
    }

    #[tokio::test]
    async fn only_one_observer_per_connection() {
        let server = broker().await;
        let conn = client(&server, "obs").await;
        let Ok(first) = conn.observe().await else {
            panic!("observe failed");
        };
        assert!(matches!(conn.observe().await, Err(HarnessError::Validation(_))));
        drop(first);
        assert!(conn.observe().await.is_ok());
    }

    #[tokio::test]
    async fn wildcard_publish_is_rejected() {
        let server = broker().await;
        let conn = client(&server, "t").await;
        assert!(matches!(
            conn.publish("a.*", "x"),
            Err(HarnessError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn close_releases_subscriptions_then_socket() {
        let server = broker().await;
        let conn = client(&server, "t").await;
        let Ok(mut sub) = conn.subscribe("a").await else {
            panic!("subscribe failed");
        };
        let Ok(_other) = conn.queue_subscribe("b", "pac0").await else {
            panic!("queue subscribe failed");
        };
        assert_eq!(server.subscription_count().await, 2);

        assert!(conn.close().await.is_ok());
        assert!(!conn.is_connected());
        assert_eq!(server.subscription_count().await, 0);
        assert!(sub.recv().await.is_none());
        assert!(matches!(conn.publish("a", "x"), Err(HarnessError::ConnectionClosed)));
        assert!(conn.close().await.is_ok(), "second close is a no-op");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let mut server = broker().await;
        let endpoint = server.endpoint();
        server.shutdown().await;
        let result = BrokerConnection::connect(&endpoint, ConnectOptions::default()).await;
        assert!(matches!(result, Err(HarnessError::Connect { .. })));
    }

    #[tokio::test]
    async fn broker_shutdown_ends_subscriptions() {
        let mut server = broker().await;
        let conn = client(&server, "t").await;
        let Ok(mut sub) = conn.subscribe("x").await else {
            panic!("subscribe failed");
        };
        server.shutdown().await;
        let Ok(None) = tokio::time::timeout(WAIT, sub.recv()).await else {
            panic!("subscription should end when the broker goes away");
        };
        assert!(!conn.is_connected());
    }
}
