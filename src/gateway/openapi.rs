//! OpenAPI document for the gateway.

use utoipa::OpenApi;

use super::handlers::{FlowAccepted, Greeting, HealthResponse};
use crate::error::{ErrorBody, ErrorResponse};

/// Path the OpenAPI JSON is served at.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// Gateway OpenAPI specification.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "pac-harness gateway", description = "HTTP surface of one PA instance"),
    paths(
        super::handlers::root_handler,
        super::handlers::healthcheck_handler,
        super::handlers::flows_handler,
    ),
    components(schemas(Greeting, HealthResponse, FlowAccepted, ErrorResponse, ErrorBody)),
    tags((name = "Gateway", description = "PA entry points"))
)]
pub struct ApiDoc;
