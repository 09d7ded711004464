//! The lifecycle capability shared by every managed component.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join_all;

use crate::error::HarnessError;

/// A component whose lifecycle the harness drives.
///
/// Implemented by the transport service, the lookup service, the HTTP
/// gateway and service runners, so contexts and tests can treat them
/// uniformly (for example, wait for all of them to be ready with one
/// deadline).
#[async_trait]
pub trait ManagedService: Send + Sync + fmt::Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Starts the component.
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] if the component cannot be started or is
    /// already running.
    async fn start(&self) -> Result<(), HarnessError>;

    /// Stops the component. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] if the component failed while stopping.
    async fn stop(&self) -> Result<(), HarnessError>;

    /// Address clients use to reach the component, once known.
    fn endpoint(&self) -> Option<String>;

    /// Returns `true` between a successful `start` and `stop`.
    fn is_running(&self) -> bool;

    /// Returns `true` if the harness runs the component in-process rather
    /// than referencing an external one.
    fn is_local(&self) -> bool {
        true
    }

    /// Suspends until the component is ready or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ReadyTimeout`] when the deadline passes.
    /// Components that can fail while starting report that failure as soon
    /// as it happens instead of waiting out the deadline.
    async fn wait_ready(&self, timeout: Duration) -> Result<(), HarnessError>;
}

/// Waits for every service concurrently with one shared deadline.
///
/// # Errors
///
/// Returns the first failure as soon as it happens: a service that fails
/// during startup is reported without waiting out the deadline, and
/// [`HarnessError::ReadyTimeout`] names a service that missed it.
pub async fn wait_all_ready(
    services: &[&dyn ManagedService],
    timeout: Duration,
) -> Result<(), HarnessError> {
    try_join_all(services.iter().map(|service| service.wait_ready(timeout))).await?;
    Ok(())
}
