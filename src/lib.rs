//! # pac-harness
//!
//! Ephemeral multi-instance orchestration harness for integration testing
//! of PA (plateforme agréée) platforms.
//!
//! A test asks for a pool of 1 to 10 PAs. Each PA gets its own HTTP
//! gateway and platform workers on ephemeral ports; the pool shares one
//! message transport and one PEPPOL lookup service. Everything is released
//! in reverse start order when the pool shuts down.
//!
//! ## Architecture
//!
//! ```text
//! WorldContext (context/)
//!     │
//!     ├── TransportService (transport/)   embedded or external broker
//!     ├── LookupService (lookup/)         mock or real participant directory
//!     │
//!     └── PaContext × N (context/)
//!             ├── BrokerConnection (broker/)
//!             ├── ServicePool → ServiceRunner × M (service/, workers/)
//!             └── Gateway (gateway/)       GET /healthcheck, POST /flows
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use pac_harness::context::{WorldConfig, WorldContext};
//!
//! # async fn run() -> Result<(), pac_harness::error::HarnessError> {
//! let mut world = WorldContext::new(WorldConfig::new(2, Duration::from_secs(5)))?;
//! world.start().await?;
//! for pa in world.pas() {
//!     println!("{} at {:?}", pa.name(), pa.api_base_url());
//! }
//! let report = world.shutdown().await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod lookup;
pub mod service;
pub mod transport;
pub mod workers;
