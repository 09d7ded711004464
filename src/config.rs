//! Harness configuration.
//!
//! The binary loads [`HarnessConfig`] from environment variables (or a
//! `.env` file via `dotenvy`). Library users build [`TransportConfig`],
//! [`crate::context::PaConfig`] and [`crate::context::WorldConfig`]
//! directly; nothing in the library reads the environment on its own.

use std::time::Duration;

use crate::domain::TransportEndpoint;
use crate::error::HarnessError;

/// Smallest PA count a world can be constructed with.
pub const MIN_PA_COUNT: usize = 1;

/// Largest number of PAs one world may hold.
pub const MAX_PA_COUNT: usize = 10;

/// PA count used when none is configured.
pub const DEFAULT_PA_COUNT: usize = 1;

/// Buffered messages per subscription before the slowest are dropped.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 1024;

/// Largest payload an embedded broker accepts.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Interface embedded brokers and gateways bind to by default.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Checks a PA count against `MIN_PA_COUNT..=MAX_PA_COUNT`.
///
/// # Errors
///
/// Returns [`HarnessError::PoolSizeOutOfRange`] for counts outside the
/// bounds.
pub fn validate_pa_count(requested: usize) -> Result<usize, HarnessError> {
    if requested < MIN_PA_COUNT || requested > MAX_PA_COUNT {
        return Err(HarnessError::PoolSizeOutOfRange {
            requested,
            min: MIN_PA_COUNT,
            max: MAX_PA_COUNT,
        });
    }
    Ok(requested)
}

/// Where a transport service gets its broker from.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interface an embedded broker binds to.
    pub host: String,
    /// Port an embedded broker binds to; 0 asks the OS for a free one.
    pub port: u16,
    /// Largest payload an embedded broker accepts.
    pub max_payload: usize,
    /// Use this external broker instead of embedding one.
    pub external: Option<TransportEndpoint>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
            max_payload: DEFAULT_MAX_PAYLOAD,
            external: None,
        }
    }
}

impl TransportConfig {
    /// Configuration referencing an external broker.
    #[must_use]
    pub fn external(endpoint: TransportEndpoint) -> Self {
        Self {
            external: Some(endpoint),
            ..Self::default()
        }
    }
}

/// Process-level configuration for the `pac-harness` binary.
///
/// Loaded once at startup via [`HarnessConfig::from_env`].
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Interface for embedded brokers and gateways.
    pub host: String,

    /// Number of PAs to start.
    pub pa_count: usize,

    /// External broker endpoint; `None` embeds one.
    pub transport_url: Option<TransportEndpoint>,

    /// Give every PA its own embedded broker instead of sharing one.
    pub private_transport: bool,

    /// Readiness deadline handed to every PA.
    pub ready_timeout: Duration,

    /// Rank reported by `/healthcheck`.
    pub rank: String,

    /// Buffered messages per subscription.
    pub subscription_capacity: usize,

    /// Largest broker payload in bytes.
    pub max_payload: usize,

    /// Emit JSON log lines instead of the human format.
    pub log_json: bool,
}

impl HarnessConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] if `PAC_TRANSPORT_URL` is set
    /// but malformed, and [`HarnessError::PoolSizeOutOfRange`] if
    /// `PAC_POOL_SIZE` is outside `1..=10`.
    pub fn from_env() -> Result<Self, HarnessError> {
        dotenvy::dotenv().ok();

        let host = std::env::var("PAC_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let pa_count = validate_pa_count(parse_env("PAC_POOL_SIZE", DEFAULT_PA_COUNT))?;

        let transport_url = match std::env::var("PAC_TRANSPORT_URL") {
            Ok(url) if !url.trim().is_empty() => Some(url.trim().parse::<TransportEndpoint>()?),
            _ => None,
        };

        let private_transport = parse_env_bool("PAC_PRIVATE_TRANSPORT", false);
        let ready_timeout = Duration::from_millis(parse_env("PAC_READY_TIMEOUT_MS", 10_000));
        let rank = std::env::var("PAC_RANK").unwrap_or_else(|_| "dev".to_string());
        let subscription_capacity =
            parse_env("PAC_SUBSCRIPTION_CAPACITY", DEFAULT_SUBSCRIPTION_CAPACITY).max(1);
        let max_payload = parse_env("PAC_MAX_PAYLOAD", DEFAULT_MAX_PAYLOAD);
        let log_json = matches!(
            std::env::var("HARNESS_LOG_FORMAT").ok().as_deref(),
            Some("json") | Some("JSON")
        );

        Ok(Self {
            host,
            pa_count,
            transport_url,
            private_transport,
            ready_timeout,
            rank,
            subscription_capacity,
            max_payload,
            log_json,
        })
    }

    /// Transport settings derived from this configuration.
    #[must_use]
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            host: self.host.clone(),
            port: 0,
            max_payload: self.max_payload,
            external: self.transport_url.clone(),
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
        _ => default,
    }
}
