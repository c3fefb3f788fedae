//! DSS backend library
//!
//! Request admission and service lifecycle for a federated Discovery and
//! Synchronization Service node.
//!
//! # Features
//!
//! - **Key trust**: PEM files or a remote JWKS, refreshed in the background
//! - **Admission**: bearer-token signature, expiry, audience and scope checks
//! - **Interceptor chain**: error normalization, logging, auth, validation
//! - **Services**: aux, remote ID and (optionally) strategic conflict detection
//! - **Lifecycle**: graceful drain on SIGINT/SIGTERM or cancellation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod rpc;
pub mod server;
pub mod services;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| Error::Config(format!("invalid log level '{level}': {e}")))?,
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        Some("text" | "console") | None => subscriber.with(fmt::layer()).try_init(),
        Some(other) => {
            return Err(Error::Config(format!(
                "unknown log format '{other}' (expected text or json)"
            )));
        }
    };
    result.map_err(|e| Error::Internal(format!("tracing already initialized: {e}")))
}
