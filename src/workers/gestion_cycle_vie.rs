//! Invoice lifecycle worker: forwards lifecycle events downstream.

use crate::service::{WorkerDefinition, handler_fn};

use super::{PLATFORM_QUEUE, with_common};

/// Worker name.
pub const NAME: &str = "gestion-cycle-vie";
/// Input subject.
pub const SUBJECT_IN: &str = "gestion-cycle-vie-IN";
/// Output subject.
pub const SUBJECT_OUT: &str = "gestion-cycle-vie-OUT";

/// The worker definition.
#[must_use]
pub fn definition() -> WorkerDefinition {
    with_common(WorkerDefinition::new(NAME).on_queue(
        SUBJECT_IN,
        PLATFORM_QUEUE,
        handler_fn(|ctx, msg| async move { ctx.publish(SUBJECT_OUT, msg.payload) }),
    ))
}
