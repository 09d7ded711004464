//! Worker definitions: subject bindings, handlers and startup hooks.
//!
//! A [`WorkerDefinition`] is plain configuration. It says which subjects a
//! worker listens on and what to do with each message; a
//! [`crate::service::ServiceRunner`] turns it into a running task.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::broker::BrokerConnection;
use crate::domain::Message;
use crate::error::HarnessError;

/// What a handler or startup hook gets to work with.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker: String,
    connection: Arc<BrokerConnection>,
}

impl WorkerContext {
    pub(crate) const fn new(worker: String, connection: Arc<BrokerConnection>) -> Self {
        Self { worker, connection }
    }

    /// Name of the worker.
    #[must_use]
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// The PA's broker connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<BrokerConnection> {
        &self.connection
    }

    /// Publishes raw bytes.
    ///
    /// # Errors
    ///
    /// See [`BrokerConnection::publish`].
    pub fn publish(&self, subject: &str, payload: impl Into<Vec<u8>>) -> Result<(), HarnessError> {
        self.connection.publish(subject, payload)
    }

    /// Publishes a JSON-encoded value.
    ///
    /// # Errors
    ///
    /// See [`BrokerConnection::publish_json`].
    pub fn publish_json<T: Serialize>(&self, subject: &str, value: &T) -> Result<(), HarnessError> {
        self.connection.publish_json(subject, value)
    }
}

/// Handles messages delivered to one subject binding.
#[async_trait]
pub trait MessageHandler: Send + Sync + fmt::Debug {
    /// Processes one message.
    ///
    /// # Errors
    ///
    /// Errors are logged by the runner; the worker keeps consuming.
    async fn handle(&self, ctx: &WorkerContext, msg: Message) -> Result<(), HarnessError>;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> fmt::Debug for FnHandler<F, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F, Fut>
where
    F: Fn(WorkerContext, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HarnessError>> + Send,
{
    async fn handle(&self, ctx: &WorkerContext, msg: Message) -> Result<(), HarnessError> {
        (self.f)(ctx.clone(), msg).await
    }
}

/// Wraps an async closure as a [`MessageHandler`].
///
/// ```
/// use pac_harness::service::handler_fn;
///
/// let echo = handler_fn(|ctx, msg| async move {
///     ctx.publish("echo", msg.payload)
/// });
/// # let _ = echo;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(WorkerContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HarnessError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _fut: PhantomData,
    })
}

/// Code run once after every binding is subscribed and before the worker
/// reports ready.
#[async_trait]
pub trait StartupHook: Send + Sync + fmt::Debug {
    /// Runs the hook.
    ///
    /// # Errors
    ///
    /// A failing hook aborts the worker before it becomes ready.
    async fn on_startup(&self, ctx: &WorkerContext) -> Result<(), HarnessError>;
}

/// One subject a worker listens on.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Subject pattern.
    pub subject: String,
    /// Queue group; members of a group share the messages.
    pub queue: Option<String>,
    /// What to do with each message.
    pub handler: Arc<dyn MessageHandler>,
}

/// Static description of a message-driven worker.
#[derive(Debug, Clone)]
pub struct WorkerDefinition {
    name: String,
    bindings: Vec<Binding>,
    hooks: Vec<Arc<dyn StartupHook>>,
}

impl WorkerDefinition {
    /// An empty worker called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Adds a plain subscription.
    #[must_use]
    pub fn on(mut self, subject: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.bindings.push(Binding {
            subject: subject.into(),
            queue: None,
            handler,
        });
        self
    }

    /// Adds a queue-group subscription.
    #[must_use]
    pub fn on_queue(
        mut self,
        subject: impl Into<String>,
        queue: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.bindings.push(Binding {
            subject: subject.into(),
            queue: Some(queue.into()),
            handler,
        });
        self
    }

    /// Adds a startup hook. Hooks run in insertion order.
    #[must_use]
    pub fn on_startup(mut self, hook: Arc<dyn StartupHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subject bindings in declaration order.
    #[must_use]
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Startup hooks in declaration order.
    #[must_use]
    pub fn hooks(&self) -> &[Arc<dyn StartupHook>] {
        &self.hooks
    }

    /// Subjects this worker listens on.
    #[must_use]
    pub fn subjects(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.subject.as_str()).collect()
    }
}
