//! Receiving side of a broker subscription.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::connection::BrokerConnection;
use crate::domain::Message;
use crate::transport::protocol::ClientOp;

/// A live interest in a subject pattern.
///
/// Messages are buffered per subscription; when the buffer is full the
/// connection drops new messages for it and logs a slow-consumer warning.
/// Dropping the subscription unsubscribes it from the broker.
#[derive(Debug)]
pub struct Subscription {
    sid: u64,
    subject: String,
    queue: Option<String>,
    rx: mpsc::Receiver<Message>,
    connection: Arc<BrokerConnection>,
}

impl Subscription {
    pub(super) fn new(
        sid: u64,
        subject: &str,
        queue: Option<&str>,
        rx: mpsc::Receiver<Message>,
        connection: Arc<BrokerConnection>,
    ) -> Self {
        Self {
            sid,
            subject: subject.to_string(),
            queue: queue.map(str::to_string),
            rx,
            connection,
        }
    }

    /// Subscription id on its connection.
    #[must_use]
    pub const fn sid(&self) -> u64 {
        self.sid
    }

    /// Subject pattern.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Queue group, if any.
    #[must_use]
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the connection is closed and the buffer drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Takes a buffered message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.connection.forget(self.sid);
        if self.connection.is_connected() {
            let _ = self.connection.send(ClientOp::Unsub {
                sid: self.sid,
                max: None,
            });
        }
    }
}
