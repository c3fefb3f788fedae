//! Server lifecycle and HTTP binding.

pub mod lifecycle;
pub mod router;

pub use lifecycle::{Server, ServerState, ShutdownReason, standard_modules};
pub use router::{AppState, create_router};
