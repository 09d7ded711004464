//! Business validation worker.
//!
//! Consumes `controle-formats-IN` as a member of the platform queue group
//! and forwards accepted documents to `controle-formats-OUT`. It also
//! keeps the `test` / `test2` probe subjects: `test2` answers `Hi!` on
//! `test`, and whatever arrives on `test` is logged.

use crate::service::{WorkerDefinition, handler_fn};

use super::{LIVENESS_SUBJECT, PLATFORM_QUEUE, with_common};

/// Worker name.
pub const NAME: &str = "validation-metier";
/// Input subject.
pub const SUBJECT_IN: &str = "controle-formats-IN";
/// Accepted documents.
pub const SUBJECT_OUT: &str = "controle-formats-OUT";
/// Rejected documents.
pub const SUBJECT_ERR: &str = "controle-formats-ERR";
/// Probe subject answered on [`LIVENESS_SUBJECT`].
pub const PROBE_SUBJECT: &str = "test2";
/// Probe answer.
pub const PROBE_REPLY: &str = "Hi!";

/// The worker definition.
#[must_use]
pub fn definition() -> WorkerDefinition {
    let def = WorkerDefinition::new(NAME)
        .on_queue(
            SUBJECT_IN,
            PLATFORM_QUEUE,
            handler_fn(|ctx, msg| async move {
                if msg.payload.is_empty() {
                    tracing::debug!(worker = NAME, "empty document rejected");
                    return ctx.publish(SUBJECT_ERR, msg.payload);
                }
                ctx.publish(SUBJECT_OUT, msg.payload)
            }),
        )
        .on(
            LIVENESS_SUBJECT,
            handler_fn(|_ctx, msg| async move {
                tracing::info!(worker = NAME, subject = %msg.subject, body = %msg.text(), "liveness message");
                Ok(())
            }),
        )
        .on(
            PROBE_SUBJECT,
            handler_fn(|ctx, msg| async move {
                let target = msg.reply_to.as_deref().unwrap_or(LIVENESS_SUBJECT);
                ctx.publish(target, PROBE_REPLY)
            }),
        );
    with_common(def)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::workers::testing::Harness;

    #[tokio::test]
    async fn forwards_documents_and_rejects_empty_ones() {
        let h = Harness::start(definition()).await;
        let mut out = h.subscribe(SUBJECT_OUT).await;
        let mut err = h.subscribe(SUBJECT_ERR).await;

        h.publish(SUBJECT_IN, r#"{"invoice":"F-1"}"#);
        h.publish(SUBJECT_IN, "");

        assert_eq!(h.next(&mut out).await.text(), r#"{"invoice":"F-1"}"#);
        assert!(h.next(&mut err).await.payload.is_empty());
        h.stop().await;
    }

    #[tokio::test]
    async fn probe_answers_on_liveness_subject() {
        let h = Harness::start(definition()).await;
        let mut test = h.subscribe(LIVENESS_SUBJECT).await;
        h.publish(PROBE_SUBJECT, "hello");
        assert_eq!(h.next(&mut test).await.text(), PROBE_REPLY);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), test.recv())
                .await
                .is_err(),
            "probe reply must not loop"
        );
        h.stop().await;
    }
}
