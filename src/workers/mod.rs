//! Built-in platform workers.
//!
//! Every PA runs the same set of message-driven workers. Each one answers
//! `ping` with `Hi!` on `pong` (or on the request's reply subject) so a
//! harness can probe a worker without knowing its business subjects.

pub mod gestion_cycle_vie;
pub mod routage;
pub mod validation_metier;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HarnessError;
use crate::lookup::LookupService;
use crate::service::{StartupHook, WorkerContext, WorkerDefinition, handler_fn};

/// Queue group shared by every PA's business workers on one transport.
pub const PLATFORM_QUEUE: &str = "pac0";

/// Subject the gateway's healthcheck publishes liveness messages on.
pub const LIVENESS_SUBJECT: &str = "test";

/// Worker probe subject.
pub const PING_SUBJECT: &str = "ping";

/// Where probe answers go when the request has no reply subject.
pub const PONG_SUBJECT: &str = "pong";

/// Logs the worker's startup; runs before the worker reports ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnounceStartup;

#[async_trait]
impl StartupHook for AnnounceStartup {
    async fn on_startup(&self, ctx: &WorkerContext) -> Result<(), HarnessError> {
        tracing::info!(
            worker = %ctx.worker(),
            endpoint = %ctx.connection().endpoint(),
            "setting up platform worker"
        );
        Ok(())
    }
}

/// Adds the `ping` probe and the startup announcement to `def`.
#[must_use]
pub fn with_common(def: WorkerDefinition) -> WorkerDefinition {
    def.on(
        PING_SUBJECT,
        handler_fn(|ctx, msg| async move {
            let target = msg.reply_to.as_deref().unwrap_or(PONG_SUBJECT);
            ctx.publish(target, "Hi!")
        }),
    )
    .on_startup(Arc::new(AnnounceStartup))
}

/// The workers every PA runs.
///
/// The routing worker needs a directory, so it is only included when a
/// lookup service is available.
#[must_use]
pub fn platform_workers(lookup: Option<&Arc<LookupService>>) -> Vec<WorkerDefinition> {
    let mut workers = vec![validation_metier::definition(), gestion_cycle_vie::definition()];
    if let Some(lookup) = lookup {
        workers.push(routage::definition(Arc::clone(lookup)));
    }
    workers
}


#[cfg(test)]
mod tests {
    use super::*;
    use testing::Harness;

    #[test]
    fn routing_needs_a_lookup_service() {
        let names = |defs: Vec<WorkerDefinition>| {
            defs.iter().map(|d| d.name().to_string()).collect::<Vec<_>>()
        };
        assert_eq!(
            names(platform_workers(None)),
            vec!["validation-metier", "gestion-cycle-vie"]
        );
        let lookup = Arc::new(LookupService::mock());
        assert_eq!(
            names(platform_workers(Some(&lookup))),
            vec!["validation-metier", "gestion-cycle-vie", "routage"]
        );
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let h = Harness::start(gestion_cycle_vie::definition()).await;
        let mut pong = h.subscribe(PONG_SUBJECT).await;
        h.publish(PING_SUBJECT, "");
        assert_eq!(h.next(&mut pong).await.text(), "Hi!");
        h.stop().await;
    }
}
