//! Gateway endpoints: greeting, healthcheck, flow submission.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::state::GatewayState;
use crate::error::{ErrorResponse, HarnessError};
use crate::workers::{LIVENESS_SUBJECT, validation_metier};

/// Fixed greeting returned by `GET /`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Greeting {
    /// Always `"World"`.
    #[serde(rename = "Hello")]
    pub hello: String,
}

/// Healthcheck response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"OK"` when the gateway can reach its broker.
    pub status: String,
    /// Configured rank of this PA.
    pub rank: String,
}

/// Published on the liveness subject by every healthcheck.
#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessMessage {
    /// PA the probe hit.
    pub pa: Uuid,
    /// Configured rank.
    pub rank: String,
    /// When the probe was served.
    pub at: DateTime<Utc>,
}

/// Response to an accepted flow submission.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FlowAccepted {
    /// Identifier assigned to the flow.
    pub flow_id: Uuid,
    /// Subject the document was published on.
    pub subject: String,
}

/// `GET /`: Fixed greeting.
#[utoipa::path(
    get,
    path = "/",
    tag = "Gateway",
    summary = "Greeting",
    responses(
        (status = 200, description = "Fixed greeting", body = Greeting),
    )
)]
pub async fn root_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(Greeting {
            hello: "World".to_string(),
        }),
    )
}

/// `GET /healthcheck`: Readiness probe; also publishes a liveness message.
#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "Gateway",
    summary = "Healthcheck",
    description = "Publishes a liveness message on the PA's transport and reports the configured rank.",
    responses(
        (status = 200, description = "Gateway and broker connection are up", body = HealthResponse),
        (status = 502, description = "Broker connection is down", body = ErrorResponse),
    )
)]
pub async fn healthcheck_handler(
    State(state): State<GatewayState>,
) -> Result<impl IntoResponse, HarnessError> {
    let liveness = LivenessMessage {
        pa: *state.pa.as_uuid(),
        rank: state.rank.clone(),
        at: Utc::now(),
    };
    state.broker.publish_json(LIVENESS_SUBJECT, &liveness)?;
    tracing::debug!(pa = %state.pa, "healthcheck served");
    Ok((
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK".to_string(),
            rank: state.rank,
        }),
    ))
}

/// `POST /flows`: Submits a document to the validation pipeline.
#[utoipa::path(
    post,
    path = "/flows",
    tag = "Gateway",
    summary = "Submit a flow",
    description = "Publishes the request body, unchanged, on the validation worker's input subject.",
    request_body(content = String, description = "Opaque document", content_type = "application/octet-stream"),
    responses(
        (status = 202, description = "Document queued", body = FlowAccepted),
        (status = 400, description = "Empty document", body = ErrorResponse),
        (status = 502, description = "Broker connection is down", body = ErrorResponse),
    )
)]
pub async fn flows_handler(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<impl IntoResponse, HarnessError> {
    if body.is_empty() {
        return Err(HarnessError::Validation("flow body must not be empty".to_string()));
    }
    let flow_id = Uuid::new_v4();
    let bytes = body.len();
    state.broker.publish(validation_metier::SUBJECT_IN, body)?;
    tracing::info!(pa = %state.pa, %flow_id, bytes, "flow accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(FlowAccepted {
            flow_id,
            subject: validation_metier::SUBJECT_IN.to_string(),
        }),
    ))
}

/// Gateway routes.
pub fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/", get(root_handler))
        .route("/healthcheck", get(healthcheck_handler))
        .route("/flows", post(flows_handler))
}
