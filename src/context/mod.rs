//! Lifecycle contexts.
//!
//! [`PaContext`] owns everything one PA needs: a broker connection, the
//! platform workers and an HTTP gateway, over a transport it either owns
//! or borrows. [`WorldContext`] holds up to ten PAs over one shared
//! transport and one lookup service.

pub mod info;
pub mod pa;
pub mod teardown;
pub mod world;

pub use info::{PaInfo, PaState, WorldInfo};
pub use pa::{PaConfig, PaContext};
pub use teardown::{TeardownFailure, TeardownReport};
pub use world::{WorldConfig, WorldContext};
