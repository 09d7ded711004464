//! Broker endpoint addressing.
//!
//! A [`TransportEndpoint`] is the `(host, port)` pair a broker listens on,
//! rendered as a `nats://host:port` URL so that external brokers can be
//! named the same way they are in the platform's settings.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// URL scheme used for broker endpoints.
pub const ENDPOINT_SCHEME: &str = "nats";

/// Host and port of a broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportEndpoint {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port (never 0 once bound).
    pub port: u16,
}

impl TransportEndpoint {
    /// Creates an endpoint from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the `nats://host:port` form.
    #[must_use]
    pub fn url(&self) -> String {
        self.to_string()
    }

    /// Returns the `host:port` string accepted by `TcpStream::connect`.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for TransportEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ENDPOINT_SCHEME}://{}:{}", self.host, self.port)
    }
}

impl FromStr for TransportEndpoint {
    type Err = HarnessError;

    /// Parses `nats://host:port` or a bare `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.split_once("://") {
            Some((scheme, rest)) if scheme == ENDPOINT_SCHEME => rest,
            Some((scheme, _)) => {
                return Err(HarnessError::Validation(format!(
                    "unsupported endpoint scheme {scheme:?} in {s:?}"
                )));
            }
            None => s,
        };
        let rest = rest.trim_end_matches('/');
        let Some((host, port)) = rest.rsplit_once(':') else {
            return Err(HarnessError::Validation(format!(
                "endpoint {s:?} has no port"
            )));
        };
        if host.is_empty() {
            return Err(HarnessError::Validation(format!(
                "endpoint {s:?} has no host"
            )));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| HarnessError::Validation(format!("invalid port in endpoint {s:?}")))?;
        if port == 0 {
            return Err(HarnessError::Validation(format!(
                "endpoint {s:?} must name a bound port"
            )));
        }
        Ok(Self::new(host, port))
    }
}
