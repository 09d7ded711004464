//! HTTP gateway: route handlers, OpenAPI document and server lifecycle.
//!
//! Every PA runs one [`Gateway`] on its own ephemeral port. `GET
//! /healthcheck` is the probe external harnesses use against a running
//! PA; it also publishes a liveness message on the PA's transport.

pub mod handlers;
pub mod openapi;
pub mod server;
pub mod state;

use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use openapi::{ApiDoc, OPENAPI_PATH};
pub use server::{Gateway, GatewayOptions};
pub use state::GatewayState;

/// Builds the complete gateway router.
pub fn build_router(state: GatewayState, request_timeout: Duration) -> Router {
    let router = handlers::routes();

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url(OPENAPI_PATH, ApiDoc::openapi()),
        )
    };

    #[cfg(not(feature = "swagger-ui"))]
    let router = router.route(OPENAPI_PATH, axum::routing::get(openapi_json));

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

#[cfg(not(feature = "swagger-ui"))]
async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    use utoipa::OpenApi;
    axum::Json(ApiDoc::openapi())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::broker::{BrokerConnection, ConnectOptions, Subscription};
    use crate::domain::PaId;
    use crate::transport::{BrokerOptions, BrokerServer};
    use crate::workers::{LIVENESS_SUBJECT, validation_metier};

    struct Fixture {
        _server: BrokerServer,
        broker: Arc<BrokerConnection>,
        router: Router,
    }

    async fn fixture() -> Fixture {
        let Ok(server) = BrokerServer::bind(BrokerOptions::default()).await else {
            panic!("bind failed");
        };
        let Ok(broker) = BrokerConnection::connect(&server.endpoint(), ConnectOptions::default()).await
        else {
            panic!("connect failed");
        };
        let state = GatewayState {
            pa: PaId::new(),
            rank: "test".to_string(),
            broker: Arc::clone(&broker),
        };
        Fixture {
            _server: server,
            broker,
            router: build_router(state, Duration::from_secs(5)),
        }
    }

    async fn send(router: Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
        let Ok(request) = Request::builder().method(method).uri(uri).body(body) else {
            panic!("bad request");
        };
        let Ok(response) = router.oneshot(request).await else {
            panic!("router failed");
        };
        let status = response.status();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn next(sub: &mut Subscription) -> crate::domain::Message {
        let Ok(Some(msg)) = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await else {
            panic!("nothing published on {}", sub.subject());
        };
        msg
    }

    #[tokio::test]
    async fn root_returns_fixed_greeting() {
        let f = fixture().await;
        let (status, json) = send(f.router, Method::GET, "/", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"Hello": "World"}));
    }

    #[tokio::test]
    async fn healthcheck_reports_rank_and_publishes_liveness() {
        let f = fixture().await;
        let Ok(mut liveness) = f.broker.subscribe(LIVENESS_SUBJECT).await else {
            panic!("subscribe failed");
        };
        let (status, json) = send(f.router, Method::GET, "/healthcheck", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"status": "OK", "rank": "test"}));

        let Ok(msg) = next(&mut liveness).await.json::<handlers::LivenessMessage>() else {
            panic!("liveness payload should be JSON");
        };
        assert_eq!(msg.rank, "test");
    }

    #[tokio::test]
    async fn healthcheck_fails_when_broker_is_gone() {
        let f = fixture().await;
        assert!(f.broker.close().await.is_ok());
        let (status, json) = send(f.router, Method::GET, "/healthcheck", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json.pointer("/error/code").and_then(Value::as_u64), Some(3003));
    }

    #[tokio::test]
    async fn flows_publish_to_validation_input() {
        let f = fixture().await;
        let Ok(mut input) = f.broker.subscribe(validation_metier::SUBJECT_IN).await else {
            panic!("subscribe failed");
        };
        let (status, json) = send(f.router.clone(), Method::POST, "/flows", Body::from("<Invoice/>")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(
            json.get("subject").and_then(Value::as_str),
            Some(validation_metier::SUBJECT_IN)
        );
        assert_eq!(next(&mut input).await.text(), "<Invoice/>");

        let (status, _) = send(f.router, Method::POST, "/flows", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn openapi_document_lists_gateway_paths() {
        let f = fixture().await;
        let (status, json) = send(f.router, Method::GET, OPENAPI_PATH, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.pointer("/paths/~1healthcheck/get").is_some());
        assert!(json.pointer("/paths/~1flows/post").is_some());
        assert!(json.pointer("/components/schemas/HealthResponse").is_some());
    }
}
