//! Broker client.
//!
//! Each PA opens exactly one [`BrokerConnection`] and shares it (behind an
//! `Arc`) with its runners and gateway.

pub mod connection;
pub mod subscription;

pub use connection::{BrokerConnection, ConnectOptions, ConnectionStats};
pub use subscription::Subscription;
