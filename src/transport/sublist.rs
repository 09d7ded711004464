//! Broker-side subscription table.
//!
//! Tracks every `(client, sid)` subscription the embedded broker holds and
//! performs server-side fan-out: plain subscriptions each receive a copy,
//! queue-group members share the message round-robin. A client whose
//! outbound queue is full misses the message instead of stalling the
//! publisher.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;

use super::protocol::ServerOp;
use crate::domain::subject;

/// Broker-assigned identity of a client connection.
pub type ClientId = u64;

type Key = (ClientId, u64);

#[derive(Debug)]
struct Entry {
    pattern: String,
    queue: Option<String>,
    sender: mpsc::Sender<ServerOp>,
    delivered: u64,
    dropped: u64,
    max: Option<u64>,
}

/// All live subscriptions of one broker.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: HashMap<Key, Entry>,
    round_robin: usize,
}

impl SubscriptionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription. An existing `(client, sid)` is replaced.
    pub fn insert(
        &mut self,
        client: ClientId,
        sid: u64,
        pattern: &str,
        queue: Option<&str>,
        sender: mpsc::Sender<ServerOp>,
    ) {
        self.entries.insert(
            (client, sid),
            Entry {
                pattern: pattern.to_string(),
                queue: queue.map(str::to_string),
                sender,
                delivered: 0,
                dropped: 0,
                max: None,
            },
        );
    }

    /// Removes a subscription now (`max = None`) or after `max` total
    /// deliveries. Returns `false` if the subscription is unknown.
    pub fn unsubscribe(&mut self, client: ClientId, sid: u64, max: Option<u64>) -> bool {
        let key = (client, sid);
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        match max {
            Some(max) if entry.delivered < max => entry.max = Some(max),
            _ => {
                self.entries.remove(&key);
            }
        }
        true
    }

    /// Drops every subscription held by `client`, returning how many.
    pub fn remove_client(&mut self, client: ClientId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(owner, _), _| *owner != client);
        before - self.entries.len()
    }

    /// Delivers a published message to every matching subscription.
    ///
    /// Returns the number of deliveries made.
    pub fn route(&mut self, subject_name: &str, reply_to: Option<&str>, payload: &[u8]) -> usize {
        let mut plain: Vec<Key> = Vec::new();
        let mut groups: BTreeMap<&str, Vec<Key>> = BTreeMap::new();
        for (key, entry) in &self.entries {
            if !subject::matches(&entry.pattern, subject_name) {
                continue;
            }
            match entry.queue.as_deref() {
                Some(queue) => groups.entry(queue).or_default().push(*key),
                None => plain.push(*key),
            }
        }

        let mut targets = plain;
        for members in groups.values_mut() {
            members.sort_unstable();
            if let Some(chosen) = members.get(self.round_robin % members.len()) {
                targets.push(*chosen);
            }
        }
        self.round_robin = self.round_robin.wrapping_add(1);

        let mut delivered = 0;
        for key in targets {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            let msg = ServerOp::Msg {
                subject: subject_name.to_string(),
                sid: key.1,
                reply_to: reply_to.map(str::to_string),
                payload: payload.to_vec(),
            };
            match entry.sender.try_send(msg) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped += 1;
                    if entry.dropped == 1 {
                        tracing::warn!(client = key.0, sid = key.1, subject = %subject_name, "slow client, dropping messages");
                    }
                    continue;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.entries.remove(&key);
                    continue;
                }
            }
            delivered += 1;
            entry.delivered += 1;
            if entry.max.is_some_and(|max| entry.delivered >= max) {
                self.entries.remove(&key);
            }
        }
        delivered
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no subscription is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages dropped so far for `(client, sid)` because its queue was full.
    #[must_use]
    pub fn dropped_for(&self, client: ClientId, sid: u64) -> Option<u64> {
        self.entries.get(&(client, sid)).map(|e| e.dropped)
    }

    /// Number of live subscriptions held by `client`.
    #[must_use]
    pub fn count_for(&self, client: ClientId) -> usize {
        self.entries.keys().filter(|(owner, _)| *owner == client).count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<ServerOp>) -> Vec<(u64, String)> {
        let mut out = Vec::new();
        while let Ok(op) = rx.try_recv() {
            let ServerOp::Msg { sid, payload, .. } = op else {
                panic!("expected MSG");
            };
            out.push((sid, String::from_utf8_lossy(&payload).into_owned()));
        }
        out
    }

    #[test]
    fn empty_routes_nothing() {
        let mut table = SubscriptionTable::new();
        assert_eq!(table.route("test", None, b"x"), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn literal_and_wildcard_both_receive() {
        let mut table = SubscriptionTable::new();
        let (tx, mut rx) = mpsc::channel(16);
        table.insert(1, 1, "test", None, tx.clone());
        table.insert(1, 2, ">", None, tx);

        assert_eq!(table.route("test", None, b"a"), 2);
        assert_eq!(table.route("other.subject", None, b"b"), 1);

        let mut got = drain(&mut rx);
        got.sort();
        assert_eq!(
            got,
            vec![
                (1, "a".to_string()),
                (2, "a".to_string()),
                (2, "b".to_string())
            ]
        );
    }

    #[test]
    fn queue_group_delivers_once_round_robin() {
        let mut table = SubscriptionTable::new();
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        table.insert(1, 1, "controle-formats-IN", Some("pac0"), tx_a);
        table.insert(2, 1, "controle-formats-IN", Some("pac0"), tx_b);

        for _ in 0..4 {
            assert_eq!(table.route("controle-formats-IN", None, b"m"), 1);
        }
        assert_eq!(drain(&mut rx_a).len(), 2);
        assert_eq!(drain(&mut rx_b).len(), 2);
    }

    #[test]
    fn unsubscribe_with_max_expires_after_deliveries() {
        let mut table = SubscriptionTable::new();
        let (tx, mut rx) = mpsc::channel(16);
        table.insert(1, 9, "test", None, tx);
        assert!(table.unsubscribe(1, 9, Some(2)));

        table.route("test", None, b"1");
        table.route("test", None, b"2");
        table.route("test", None, b"3");
        assert_eq!(drain(&mut rx).len(), 2);
        assert!(table.is_empty());
        assert!(!table.unsubscribe(1, 9, None));
    }

    #[test]
    fn closed_receiver_is_pruned() {
        let mut table = SubscriptionTable::new();
        let (tx, rx) = mpsc::channel(16);
        table.insert(3, 1, "test", None, tx);
        drop(rx);
        assert_eq!(table.route("test", None, b"x"), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_client_drops_only_its_entries() {
        let mut table = SubscriptionTable::new();
        let (tx, _rx) = mpsc::channel(16);
        table.insert(1, 1, "a", None, tx.clone());
        table.insert(1, 2, "b", None, tx.clone());
        table.insert(2, 1, "a", None, tx);
        assert_eq!(table.count_for(1), 2);
        assert_eq!(table.remove_client(1), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.count_for(2), 1);
    }

    #[test]
    fn full_client_queue_drops_without_unsubscribing() {
        let mut table = SubscriptionTable::new();
        let (tx, mut rx) = mpsc::channel(2);
        table.insert(1, 1, "test", None, tx);
        for payload in [b"1", b"2", b"3", b"4"] {
            table.route("test", None, payload);
        }
        assert_eq!(table.dropped_for(1, 1), Some(2));
        assert_eq!(table.len(), 1);
        assert_eq!(drain(&mut rx), vec![(1, "1".to_string()), (1, "2".to_string())]);

        assert_eq!(table.route("test", None, b"5"), 1, "delivery resumes once drained");
    }
}
