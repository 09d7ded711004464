//! Transport layer: the embedded broker and the service that owns it.
//!
//! The broker speaks a small subset of the NATS text protocol (`INFO`,
//! `CONNECT`, `PUB`, `SUB`, `UNSUB`, `MSG`, `PING`, `PONG`), enough for
//! subject routing, wildcard subscriptions and queue groups.

pub mod protocol;
pub mod server;
pub mod service;
pub mod sublist;

pub use server::{BrokerOptions, BrokerServer};
pub use service::{Ownership, TransportInfo, TransportService};
