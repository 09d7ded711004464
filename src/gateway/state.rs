//! Shared state injected into every gateway handler.

use std::sync::Arc;

use crate::broker::BrokerConnection;
use crate::domain::PaId;

/// Shared gateway state available to all handlers via Axum's `State`
/// extractor.
#[derive(Debug, Clone)]
pub struct GatewayState {
    /// PA this gateway fronts.
    pub pa: PaId,
    /// Rank reported by `/healthcheck`.
    pub rank: String,
    /// The PA's broker connection.
    pub broker: Arc<BrokerConnection>,
}
