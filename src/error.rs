//! Harness error types with HTTP status code mapping.
//!
//! [`HarnessError`] is the central error type for the harness. Every
//! lifecycle operation (bind, connect, readiness, teardown) reports through
//! it, and the gateway maps each variant to a structured JSON error
//! response.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 3002,
///     "message": "connection to broker closed",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`HarnessError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Harness error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status               |
/// |-----------|-------------------|---------------------------|
/// | 1000–1999 | Validation        | 400 Bad Request           |
/// | 2000–2999 | Lifecycle state   | 409 Conflict / 504        |
/// | 3000–3999 | Resource / I/O    | 500 / 502                 |
/// | 4000–4999 | Worker / Lookup   | 500 / 502                 |
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Malformed configuration or argument.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Requested PA count is outside the allowed bounds.
    #[error("pa count {requested} out of range (allowed {min}..={max})")]
    PoolSizeOutOfRange {
        /// Count that was asked for.
        requested: usize,
        /// Smallest accepted count.
        min: usize,
        /// Largest accepted count.
        max: usize,
    },

    /// A socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A connection to a broker endpoint could not be established.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker connection is closed.
    #[error("connection to broker closed")]
    ConnectionClosed,

    /// A readiness wait ran past its deadline.
    #[error("{name} not ready after {timeout:?}")]
    ReadyTimeout {
        /// Component that was awaited.
        name: String,
        /// Deadline that expired.
        timeout: Duration,
    },

    /// An operation needs a component that has not been started.
    #[error("{0} is not running")]
    NotStarted(String),

    /// `start` was called twice.
    #[error("{0} is already running")]
    AlreadyRunning(String),

    /// Two running PAs ended up on the same port.
    #[error("port {port} already used by {owner}")]
    PortConflict {
        /// Duplicated port.
        port: u16,
        /// Name of the PA that holds the port.
        owner: String,
    },

    /// A worker body returned an error.
    #[error("worker {name} failed: {message}")]
    WorkerFailed {
        /// Worker name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// A worker task panicked.
    #[error("worker {name} panicked: {message}")]
    WorkerPanicked {
        /// Worker name.
        name: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// A message handler rejected a message.
    #[error("handler error: {0}")]
    Handler(String),

    /// The participant directory could not be queried.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// Generic I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Validation(_) => 1001,
            Self::PoolSizeOutOfRange { .. } => 1002,
            Self::Json(_) => 1003,
            Self::NotStarted(_) => 2001,
            Self::AlreadyRunning(_) => 2002,
            Self::ReadyTimeout { .. } => 2003,
            Self::PortConflict { .. } => 2004,
            Self::Bind { .. } => 3001,
            Self::Connect { .. } => 3002,
            Self::ConnectionClosed => 3003,
            Self::Protocol(_) => 3004,
            Self::Io(_) => 3000,
            Self::WorkerFailed { .. } => 4001,
            Self::WorkerPanicked { .. } => 4002,
            Self::Handler(_) => 4003,
            Self::Lookup(_) => 4004,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PoolSizeOutOfRange { .. } | Self::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotStarted(_) | Self::AlreadyRunning(_) | Self::PortConflict { .. } => {
                StatusCode::CONFLICT
            }
            Self::ReadyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Connect { .. } | Self::ConnectionClosed | Self::Lookup(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Bind { .. }
            | Self::Protocol(_)
            | Self::Io(_)
            | Self::WorkerFailed { .. }
            | Self::WorkerPanicked { .. }
            | Self::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` for the distinguishable readiness-timeout condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadyTimeout { .. })
    }

    /// Returns `true` for construction-time validation failures.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::PoolSizeOutOfRange { .. })
    }
}

impl IntoResponse for HarnessError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_message_names_bounds() {
        let err = HarnessError::PoolSizeOutOfRange {
            requested: 11,
            min: 1,
            max: 10,
        };
        assert_eq!(err.to_string(), "pa count 11 out of range (allowed 1..=10)");
        assert!(err.is_validation());
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = HarnessError::ReadyTimeout {
            name: "routage".to_string(),
            timeout: Duration::from_millis(100),
        };
        assert!(err.is_timeout());
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_code(), 2003);
    }

    #[test]
    fn into_response_carries_status() {
        let response = HarnessError::ConnectionClosed.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
