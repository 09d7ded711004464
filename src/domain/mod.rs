//! Domain layer: identities, endpoints, subjects and messages.
//!
//! These are the small value types shared by the transport, broker client,
//! workers and contexts. None of them own a resource.

pub mod endpoint;
pub mod message;
pub mod pa_id;
pub mod subject;

pub use endpoint::TransportEndpoint;
pub use message::Message;
pub use pa_id::PaId;
