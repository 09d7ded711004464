//! PEPPOL-style participant lookup.
//!
//! A [`LookupService`] resolves `(scheme_id, participant_id)` to a
//! [`PeppolEndpoint`] or a not-found result with the same contract in
//! mock and real mode.

pub mod directory;
pub mod endpoint;
pub mod service;

pub use directory::{MockDirectory, ParticipantDirectory};
pub use endpoint::{
    LookupErrorCode, LookupResult, ParticipantKey, PeppolEndpoint, SIREN_SCHEME, TransportProfile,
};
pub use service::{LookupInfo, LookupMode, LookupService};
