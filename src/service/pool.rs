//! A group of runners sharing one broker connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use super::capability::{ManagedService, wait_all_ready};
use super::runner::{RunnerInfo, ServiceRunner};
use super::worker::WorkerDefinition;
use crate::broker::BrokerConnection;
use crate::error::HarnessError;

/// Starts, awaits and stops a set of workers together.
#[derive(Debug)]
pub struct ServicePool {
    runners: Vec<ServiceRunner>,
}

impl ServicePool {
    /// One runner per definition, all bound to `connection`.
    #[must_use]
    pub fn new(definitions: Vec<WorkerDefinition>, connection: &Arc<BrokerConnection>) -> Self {
        let runners = definitions
            .into_iter()
            .map(|def| ServiceRunner::new(def, Arc::clone(connection)))
            .collect();
        Self { runners }
    }

    /// Runners in definition order.
    #[must_use]
    pub fn runners(&self) -> &[ServiceRunner] {
        &self.runners
    }

    /// Number of runners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Returns `true` if the pool has no runners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Schedules every runner. Does not wait for readiness.
    ///
    /// # Errors
    ///
    /// Returns the first start failure; runners started before it keep
    /// running and must be stopped by the caller.
    pub async fn start_all(&self) -> Result<(), HarnessError> {
        for runner in &self.runners {
            runner.start().await?;
        }
        Ok(())
    }

    /// Waits for every runner with one shared deadline.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ReadyTimeout`] naming a runner that missed
    /// the deadline, or the [`HarnessError::WorkerFailed`] /
    /// [`HarnessError::WorkerPanicked`] of a runner that died while
    /// starting, without waiting for the others.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), HarnessError> {
        let services: Vec<&dyn ManagedService> = self
            .runners
            .iter()
            .map(|r| r as &dyn ManagedService)
            .collect();
        wait_all_ready(&services, timeout).await
    }

    /// Requests cancellation of every runner, then awaits them all.
    ///
    /// Never fails part-way: every runner is joined and the failures are
    /// returned.
    pub async fn stop_all(&self) -> Vec<HarnessError> {
        for runner in &self.runners {
            runner.request_stop();
        }
        join_all(self.runners.iter().map(ServiceRunner::join))
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    /// Returns `true` once every runner is ready.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.runners.iter().all(ServiceRunner::is_ready)
    }

    /// Snapshot of every runner.
    #[must_use]
    pub fn info(&self) -> Vec<RunnerInfo> {
        self.runners.iter().map(ServiceRunner::info).collect()
    }
}
