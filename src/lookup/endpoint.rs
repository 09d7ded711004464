//! Directory request and response types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// ISO 6523 scheme for French SIREN numbers.
pub const SIREN_SCHEME: &str = "0009";

/// A participant identifier within an identifier scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantKey {
    /// Identifier scheme (for example `0009`).
    pub scheme_id: String,
    /// Identifier within the scheme.
    pub participant_id: String,
}

impl ParticipantKey {
    /// Builds a key, rejecting empty or whitespace-only parts.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] if either part is blank.
    pub fn new(
        scheme_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Result<Self, HarnessError> {
        let scheme_id = scheme_id.into().trim().to_string();
        let participant_id = participant_id.into().trim().to_string();
        if scheme_id.is_empty() || participant_id.is_empty() {
            return Err(HarnessError::Validation(
                "scheme_id and participant_id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            scheme_id,
            participant_id,
        })
    }

    /// Key for a SIREN number.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] if `siren` is blank.
    pub fn siren(siren: impl Into<String>) -> Result<Self, HarnessError> {
        Self::new(SIREN_SCHEME, siren)
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme_id, self.participant_id)
    }
}

/// How an access point expects documents to be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportProfile {
    /// `peppol-transport-as4-v2_0`
    As4V2,
    /// `busdox-transport-as2-ver1p0`
    As2V1,
    /// Any profile the harness does not know by name.
    Other(String),
}

impl TransportProfile {
    /// Wire identifier of the profile.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::As4V2 => "peppol-transport-as4-v2_0",
            Self::As2V1 => "busdox-transport-as2-ver1p0",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for TransportProfile {
    fn from(value: String) -> Self {
        match value.as_str() {
            "peppol-transport-as4-v2_0" => Self::As4V2,
            "busdox-transport-as2-ver1p0" => Self::As2V1,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for TransportProfile {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<TransportProfile> for String {
    fn from(value: TransportProfile) -> Self {
        match value {
            TransportProfile::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TransportProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to deliver documents to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeppolEndpoint {
    /// Access point URI.
    pub address: String,
    /// Access point certificate, opaque to the harness.
    pub certificate: String,
    /// Delivery profile.
    pub transport_profile: TransportProfile,
}

impl PeppolEndpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        certificate: impl Into<String>,
        transport_profile: impl Into<TransportProfile>,
    ) -> Self {
        Self {
            address: address.into(),
            certificate: certificate.into(),
            transport_profile: transport_profile.into(),
        }
    }
}

/// Why a lookup found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupErrorCode {
    /// No directory entry for the participant.
    ParticipantNotFound,
}

impl LookupErrorCode {
    /// Stable string code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParticipantNotFound => "PARTICIPANT_NOT_FOUND",
        }
    }
}

impl fmt::Display for LookupErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a directory lookup.
///
/// Not-found is an ordinary result, not an error: callers branch on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupResult {
    /// The participant is reachable at this endpoint.
    Found(PeppolEndpoint),
    /// The participant is unknown.
    NotFound {
        /// Reason code.
        error_code: LookupErrorCode,
    },
}

impl LookupResult {
    /// The standard "participant not found" result.
    #[must_use]
    pub const fn not_found() -> Self {
        Self::NotFound {
            error_code: LookupErrorCode::ParticipantNotFound,
        }
    }

    /// Returns `true` for [`LookupResult::Found`].
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// The endpoint, if found.
    #[must_use]
    pub const fn endpoint(&self) -> Option<&PeppolEndpoint> {
        match self {
            Self::Found(endpoint) => Some(endpoint),
            Self::NotFound { .. } => None,
        }
    }

    /// The error code, if not found.
    #[must_use]
    pub const fn error_code(&self) -> Option<LookupErrorCode> {
        match self {
            Self::Found(_) => None,
            Self::NotFound { error_code } => Some(*error_code),
        }
    }
}
