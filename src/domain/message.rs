//! Messages delivered by the broker.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::HarnessError;

/// A message received on a subscription.
///
/// The payload is opaque to the harness; workers decode it as they like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,
    /// Optional reply subject supplied by the publisher.
    pub reply_to: Option<String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Time the client received the message.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message stamped with the current time.
    #[must_use]
    pub fn new(subject: impl Into<String>, reply_to: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            reply_to,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Returns the payload as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Decodes the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Json`] if the payload is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HarnessError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
