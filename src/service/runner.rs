//! Runs one worker definition as a background task.
//!
//! Lifecycle: `Created → Starting → Ready → Stopping → Stopped`. `Ready`
//! is raised by the worker task itself once every binding is subscribed
//! and every startup hook has run, so waiting on it replaces any fixed
//! sleep. A runner may be stopped before it ever becomes ready.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};

use super::capability::ManagedService;
use super::readiness::ReadySignal;
use super::worker::{MessageHandler, WorkerContext, WorkerDefinition};
use crate::broker::{BrokerConnection, Subscription};
use crate::error::HarnessError;

/// Observable runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Constructed, never started.
    Created,
    /// Task scheduled, startup not finished.
    Starting,
    /// Readiness signal raised.
    Ready,
    /// Cancellation requested, task not yet joined.
    Stopping,
    /// Task joined.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Serializable runner snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerInfo {
    /// Worker name.
    pub name: String,
    /// Subjects the worker listens on.
    pub subjects: Vec<String>,
    /// Current state.
    pub state: RunnerState,
}

type WorkerTask = JoinHandle<Result<(), HarnessError>>;

/// How the worker task ended, published as soon as it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkerExit {
    Returned,
    Failed(String),
    Panicked,
    Cancelled,
}

/// Publishes the exit of the worker task, including a panic or an abort.
#[derive(Debug)]
struct ExitGuard {
    exit: Arc<watch::Sender<Option<WorkerExit>>>,
}

impl ExitGuard {
    fn finish(self, exit: WorkerExit) {
        self.exit.send_replace(Some(exit));
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let exit = if std::thread::panicking() {
            WorkerExit::Panicked
        } else {
            WorkerExit::Cancelled
        };
        self.exit.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(exit);
            true
        });
    }
}

/// A message-driven worker running atop a shared broker connection.
#[derive(Debug)]
pub struct ServiceRunner {
    definition: WorkerDefinition,
    connection: Arc<BrokerConnection>,
    ready: ReadySignal,
    exit: Arc<watch::Sender<Option<WorkerExit>>>,
    phase: Mutex<Phase>,
    task: Mutex<Option<WorkerTask>>,
}

impl ServiceRunner {
    /// Creates a runner; nothing happens until [`ManagedService::start`].
    #[must_use]
    pub fn new(definition: WorkerDefinition, connection: Arc<BrokerConnection>) -> Self {
        let ready = ReadySignal::new(definition.name());
        Self {
            definition,
            connection,
            ready,
            exit: Arc::new(watch::channel(None).0),
            phase: Mutex::new(Phase::Created),
            task: Mutex::new(None),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task(&self) -> MutexGuard<'_, Option<WorkerTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The worker this runner executes.
    #[must_use]
    pub const fn definition(&self) -> &WorkerDefinition {
        &self.definition
    }

    /// The readiness signal raised by the worker task.
    #[must_use]
    pub const fn ready_signal(&self) -> &ReadySignal {
        &self.ready
    }

    /// Returns `true` once the worker has completed its startup.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.is_set()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RunnerState {
        match *self.phase() {
            Phase::Created => RunnerState::Created,
            Phase::Started if self.ready.is_set() => RunnerState::Ready,
            Phase::Started => RunnerState::Starting,
            Phase::Stopping => RunnerState::Stopping,
            Phase::Stopped => RunnerState::Stopped,
        }
    }

    /// Snapshot for info endpoints.
    #[must_use]
    pub fn info(&self) -> RunnerInfo {
        RunnerInfo {
            name: self.definition.name().to_string(),
            subjects: self
                .definition
                .subjects()
                .into_iter()
                .map(str::to_string)
                .collect(),
            state: self.state(),
        }
    }

    /// Requests cancellation without waiting for it.
    ///
    /// Used to stop a group of runners concurrently: request all, then
    /// [`join`](Self::join) each.
    pub fn request_stop(&self) {
        if let Some(task) = self.task().as_ref() {
            task.abort();
        }
        let mut phase = self.phase();
        if *phase == Phase::Started {
            *phase = Phase::Stopping;
        }
    }

    /// Waits for the worker task to end.
    ///
    /// Cancellation caused by [`request_stop`](Self::request_stop) is
    /// expected and absorbed here. Anything else the worker ended with is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::WorkerFailed`] if the worker body returned
    /// an error and [`HarnessError::WorkerPanicked`] if it panicked.
    pub async fn join(&self) -> Result<(), HarnessError> {
        let task = self.task().take();
        let Some(task) = task else {
            return Ok(());
        };
        let outcome = match task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HarnessError::WorkerFailed {
                name: self.definition.name().to_string(),
                message: e.to_string(),
            }),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(HarnessError::WorkerPanicked {
                name: self.definition.name().to_string(),
                message: panic_message(e),
            }),
        };
        *self.phase() = Phase::Stopped;
        tracing::debug!(worker = %self.definition.name(), ok = outcome.is_ok(), "runner stopped");
        outcome
    }

    fn exit_error(&self, exit: Option<WorkerExit>, timeout: Duration) -> HarnessError {
        let name = self.definition.name().to_string();
        match exit {
            Some(WorkerExit::Failed(message)) => HarnessError::WorkerFailed { name, message },
            Some(WorkerExit::Panicked) => HarnessError::WorkerPanicked {
                name,
                message: "panicked before becoming ready".to_string(),
            },
            // Stopped before ready: readiness can no longer arrive.
            Some(WorkerExit::Cancelled) => HarnessError::ReadyTimeout { name, timeout },
            Some(WorkerExit::Returned) | None => HarnessError::WorkerFailed {
                name,
                message: "exited before becoming ready".to_string(),
            },
        }
    }
}

#[async_trait]
impl ManagedService for ServiceRunner {
    fn name(&self) -> &str {
        self.definition.name()
    }

    /// Schedules the worker task and returns without waiting for readiness.
    async fn start(&self) -> Result<(), HarnessError> {
        let mut phase = self.phase();
        match *phase {
            Phase::Created => {}
            Phase::Started | Phase::Stopping => {
                return Err(HarnessError::AlreadyRunning(self.definition.name().to_string()));
            }
            Phase::Stopped => {
                return Err(HarnessError::Validation(format!(
                    "runner {} cannot be restarted",
                    self.definition.name()
                )));
            }
        }
        let task = tokio::spawn(run_worker(
            self.definition.clone(),
            Arc::clone(&self.connection),
            self.ready.clone(),
            ExitGuard {
                exit: Arc::clone(&self.exit),
            },
        ));
        *self.task() = Some(task);
        *phase = Phase::Started;
        tracing::debug!(worker = %self.definition.name(), "runner scheduled");
        Ok(())
    }

    async fn stop(&self) -> Result<(), HarnessError> {
        self.request_stop();
        self.join().await
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.connection.endpoint().url())
    }

    fn is_running(&self) -> bool {
        matches!(*self.phase(), Phase::Started | Phase::Stopping)
    }

    /// Suspends until the worker is ready, the deadline passes, or the
    /// worker task ends without becoming ready.
    async fn wait_ready(&self, timeout: Duration) -> Result<(), HarnessError> {
        if self.ready.is_set() {
            return Ok(());
        }
        let mut exit_rx = self.exit.subscribe();
        let exited = async {
            let exit = exit_rx.wait_for(Option::is_some).await.map(|exit| exit.clone());
            match exit {
                Ok(exit) => exit,
                Err(_) => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            ready = self.ready.wait(timeout) => ready,
            exit = exited => {
                if self.ready.is_set() {
                    return Ok(());
                }
                Err(self.exit_error(exit, timeout))
            }
        }
    }
}

impl Drop for ServiceRunner {
    fn drop(&mut self) {
        if let Some(task) = self.task().take() {
            task.abort();
        }
    }
}

async fn run_worker(
    definition: WorkerDefinition,
    connection: Arc<BrokerConnection>,
    ready: ReadySignal,
    guard: ExitGuard,
) -> Result<(), HarnessError> {
    let name = definition.name().to_string();
    let result = drive(&definition, connection, &ready).await;
    match &result {
        Ok(()) => guard.finish(WorkerExit::Returned),
        Err(e) => {
            tracing::warn!(worker = %name, error = %e, "worker ended with an error");
            guard.finish(WorkerExit::Failed(e.to_string()));
        }
    }
    result
}

async fn drive(
    definition: &WorkerDefinition,
    connection: Arc<BrokerConnection>,
    ready: &ReadySignal,
) -> Result<(), HarnessError> {
    let ctx = WorkerContext::new(definition.name().to_string(), Arc::clone(&connection));

    let mut subscriptions = Vec::with_capacity(definition.bindings().len());
    for binding in definition.bindings() {
        let sub = match &binding.queue {
            Some(queue) => connection.queue_subscribe(&binding.subject, queue).await?,
            None => connection.subscribe(&binding.subject).await?,
        };
        subscriptions.push((sub, Arc::clone(&binding.handler)));
    }

    for hook in definition.hooks() {
        hook.on_startup(&ctx).await?;
    }
    ready.set();
    tracing::info!(worker = %ctx.worker(), subjects = ?definition.subjects(), "worker ready");

    let mut consumers = JoinSet::new();
    for (sub, handler) in subscriptions {
        consumers.spawn(consume(sub, handler, ctx.clone()));
    }
    if consumers.is_empty() {
        std::future::pending::<()>().await;
    }
    while let Some(joined) = consumers.join_next().await {
        if let Err(e) = joined
            && e.is_panic()
        {
            return Err(HarnessError::Handler(format!(
                "handler in {} panicked: {}",
                ctx.worker(),
                panic_message(e)
            )));
        }
    }
    Ok(())
}

async fn consume(mut sub: Subscription, handler: Arc<dyn MessageHandler>, ctx: WorkerContext) {
    while let Some(msg) = sub.recv().await {
        tracing::debug!(worker = %ctx.worker(), subject = %msg.subject, bytes = msg.payload.len(), "message received");
        let subject = msg.subject.clone();
        if let Err(e) = handler.handle(&ctx, msg).await {
            tracing::warn!(worker = %ctx.worker(), %subject, error = %e, "handler failed");
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
