//! Request admission: verification keys, scope policy and token authorization.
//!
//! # Architecture
//!
//! ```text
//! CredentialSource ──► KeyResolver ──► KeyCache (background refresh)
//!                                          │
//! ServiceModule::auth_scopes ──► ScopePolicyRegistry
//!                                          │
//!                                     Authorizer ──► AccessClaims | AuthError
//! ```
//!
//! Everything here is built once at startup and shared by `Arc`; there is no
//! process-wide state.

pub mod authorizer;
pub mod cache;
pub mod keys;
pub mod resolver;
pub mod scopes;

pub use authorizer::{AccessClaims, AudiencePolicy, AuthError, Authorizer, AuthorizerConfig};
pub use cache::{DEFAULT_REFRESH_INTERVAL, KeyCache};
pub use keys::{
    CredentialSource, KeyFamily, KeyResolver, ResolutionError, VerificationKey, VerificationKeySet,
};
pub use resolver::{FileKeyResolver, JwksKeyResolver};
pub use scopes::{PolicyConflictError, ScopeDeclaration, ScopePolicyRegistry, ScopeSet, scope_set};
