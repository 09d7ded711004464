//! Read-only snapshots of contexts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::lookup::LookupInfo;
use crate::service::RunnerInfo;
use crate::transport::TransportInfo;

/// Lifecycle of a PA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaState {
    /// Constructed, not started.
    Created,
    /// Children are being started.
    Starting,
    /// Every child is up and every runner is ready.
    Running,
    /// Children are being released.
    Stopping,
    /// Everything released.
    Stopped,
}

/// Snapshot of one PA.
#[derive(Debug, Clone, Serialize)]
pub struct PaInfo {
    /// PA identifier.
    pub id: Uuid,
    /// Display name (`pa1`, `pa2`, …).
    pub name: String,
    /// Lifecycle state.
    pub state: PaState,
    /// `nats://host:port` of the transport this PA uses.
    pub transport_url: Option<String>,
    /// Transport port.
    pub transport_port: Option<u16>,
    /// `http://host:port` of the gateway.
    pub api_base_url: Option<String>,
    /// Gateway port.
    pub api_port: Option<u16>,
    /// Whether the PA is running.
    pub is_running: bool,
    /// Whether the PA owns (and will stop) its transport.
    pub owns_transport: bool,
    /// Runner states.
    pub runners: Vec<RunnerInfo>,
    /// When the PA reached `Running`.
    pub started_at: Option<DateTime<Utc>>,
}

/// Snapshot of a world.
#[derive(Debug, Clone, Serialize)]
pub struct WorldInfo {
    /// The shared transport.
    pub transport: TransportInfo,
    /// The shared lookup service.
    pub lookup: LookupInfo,
    /// Every PA, in creation order.
    pub pas: Vec<PaInfo>,
    /// Whether the world is running.
    pub is_running: bool,
}
