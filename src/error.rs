//! Error types for the DSS backend
//!
//! These are startup / process-level errors. Per-call failures travel through
//! the interceptor chain as [`Status`](crate::rpc::Status) values instead.

use std::io;

use thiserror::Error;

use crate::auth::{PolicyConflictError, ResolutionError};

/// Result type alias for the DSS backend
pub type Result<T> = std::result::Result<T, Error>;

/// DSS backend errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Verification keys could not be resolved
    #[error("Key resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// Two service modules disagree on the scopes of a method
    #[error(transparent)]
    PolicyConflict(#[from] PolicyConflictError),

    /// IO error (bind, accept, signal handler installation)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error was raised before the server reached `Serving`.
    #[must_use]
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Resolution(_) | Self::PolicyConflict(_)
        )
    }
}
