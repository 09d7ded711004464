//! Routing worker.
//!
//! Decodes an [`InvoiceMessage`] from `routage-IN`, resolves the
//! recipient through the lookup service and publishes a [`RoutingResult`]
//! on `routage-OUT` when the recipient is reachable, or on `routage-ERR`
//! when it is unknown or the message cannot be decoded.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PLATFORM_QUEUE, with_common};
use crate::domain::Message;
use crate::error::HarnessError;
use crate::lookup::{LookupResult, LookupService, PeppolEndpoint, SIREN_SCHEME};
use crate::service::{MessageHandler, WorkerContext, WorkerDefinition};

/// Worker name.
pub const NAME: &str = "routage";
/// Input subject.
pub const SUBJECT_IN: &str = "routage-IN";
/// Routed invoices.
pub const SUBJECT_OUT: &str = "routage-OUT";
/// Unroutable invoices.
pub const SUBJECT_ERR: &str = "routage-ERR";

/// An invoice waiting to be routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceMessage {
    /// Invoice identifier.
    pub invoice_id: String,
    /// Identifier scheme of the recipient; SIREN when omitted.
    #[serde(default = "default_scheme")]
    pub recipient_scheme: String,
    /// Recipient identifier.
    pub recipient_id: String,
    /// Document body, carried through untouched.
    #[serde(default)]
    pub document: serde_json::Value,
}

fn default_scheme() -> String {
    SIREN_SCHEME.to_string()
}

/// Outcome of routing one invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStatus {
    /// The recipient's access point is known.
    Routed,
    /// The directory has no entry for the recipient.
    RecipientNotFound,
    /// The message could not be decoded.
    Rejected,
}

/// Published on `routage-OUT` or `routage-ERR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    /// Invoice identifier, when the message could be decoded.
    pub invoice_id: Option<String>,
    /// Outcome.
    pub status: RoutingStatus,
    /// Destination access point, when routed.
    pub endpoint: Option<PeppolEndpoint>,
    /// Machine-readable reason, when not routed.
    pub error_code: Option<String>,
    /// Human-readable reason, when not routed.
    pub detail: Option<String>,
    /// Time the decision was made.
    pub routed_at: DateTime<Utc>,
}

impl RoutingResult {
    fn routed(invoice_id: String, endpoint: PeppolEndpoint) -> Self {
        Self {
            invoice_id: Some(invoice_id),
            status: RoutingStatus::Routed,
            endpoint: Some(endpoint),
            error_code: None,
            detail: None,
            routed_at: Utc::now(),
        }
    }

    fn not_found(invoice_id: String, code: &str) -> Self {
        Self {
            invoice_id: Some(invoice_id),
            status: RoutingStatus::RecipientNotFound,
            endpoint: None,
            error_code: Some(code.to_string()),
            detail: None,
            routed_at: Utc::now(),
        }
    }

    fn rejected(invoice_id: Option<String>, error: &HarnessError) -> Self {
        Self {
            invoice_id,
            status: RoutingStatus::Rejected,
            endpoint: None,
            error_code: Some(error.error_code().to_string()),
            detail: Some(error.to_string()),
            routed_at: Utc::now(),
        }
    }
}

/// Resolves invoice recipients through a [`LookupService`].
#[derive(Debug)]
pub struct RoutingHandler {
    lookup: Arc<LookupService>,
}

impl RoutingHandler {
    /// Routes with `lookup`.
    #[must_use]
    pub const fn new(lookup: Arc<LookupService>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl MessageHandler for RoutingHandler {
    async fn handle(&self, ctx: &WorkerContext, msg: Message) -> Result<(), HarnessError> {
        let invoice: InvoiceMessage = match msg.json() {
            Ok(invoice) => invoice,
            Err(e) => {
                tracing::debug!(worker = NAME, error = %e, "undecodable invoice");
                return ctx.publish_json(SUBJECT_ERR, &RoutingResult::rejected(None, &e));
            }
        };

        let lookup = self
            .lookup
            .lookup(&invoice.recipient_scheme, &invoice.recipient_id)
            .await;
        match lookup {
            Ok(LookupResult::Found(endpoint)) => {
                tracing::info!(
                    worker = NAME,
                    invoice = %invoice.invoice_id,
                    address = %endpoint.address,
                    "invoice routed"
                );
                ctx.publish_json(SUBJECT_OUT, &RoutingResult::routed(invoice.invoice_id, endpoint))
            }
            Ok(LookupResult::NotFound { error_code }) => {
                tracing::info!(worker = NAME, invoice = %invoice.invoice_id, %error_code, "recipient unknown");
                ctx.publish_json(
                    SUBJECT_ERR,
                    &RoutingResult::not_found(invoice.invoice_id, error_code.as_str()),
                )
            }
            Err(e) => {
                ctx.publish_json(
                    SUBJECT_ERR,
                    &RoutingResult::rejected(Some(invoice.invoice_id), &e),
                )?;
                Err(e)
            }
        }
    }
}

/// The worker definition, routing through `lookup`.
#[must_use]
pub fn definition(lookup: Arc<LookupService>) -> WorkerDefinition {
    with_common(WorkerDefinition::new(NAME).on_queue(
        SUBJECT_IN,
        PLATFORM_QUEUE,
        Arc::new(RoutingHandler::new(lookup)),
    ))
}
