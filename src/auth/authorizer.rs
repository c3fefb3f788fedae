//! Bearer-token authorizer.
//!
//! # Decision procedure
//!
//! 1. No credential source configured: allow everything (insecure mode).
//! 2. Decode the JWT header; look its `kid` up in [`KeyCache::current`].
//! 3. Verify signature, `exp` (required) and `nbf` with a fixed leeway. The
//!    accepted algorithms come from the key, never from the header alone.
//! 4. Audience must intersect the accepted set.
//! 5. Granted scopes must intersect the method's required scopes.
//!
//! Steps 2–3 fail with [`AuthError::Unauthenticated`]; steps 4–5 with
//! [`AuthError::PermissionDenied`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{TokenData, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cache::KeyCache;
use super::scopes::{ScopePolicyRegistry, ScopeSet};

/// Clock skew tolerated on `exp` / `nbf`, in seconds.
pub const CLOCK_SKEW_LEEWAY_SECS: u64 = 10;

/// Authorization failure, mapped onto the wire taxonomy by the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Missing, malformed, unverifiable or expired token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Valid token without the audience or scope this call needs.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Identity and grants extracted from a verified token. Lives for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessClaims {
    /// `sub` claim.
    pub subject: String,
    /// Scopes granted by the token.
    pub scopes: ScopeSet,
    /// `aud` values.
    pub audiences: Vec<String>,
    /// Expiry instant; `None` in insecure mode.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessClaims {
    /// Claims attached to calls when authorization is disabled.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            scopes: ScopeSet::new(),
            audiences: Vec::new(),
            expires_at: None,
        }
    }

    /// Whether the token granted `scope`.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Which `aud` values are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudiencePolicy {
    /// Accept any audience. Only produced by explicit configuration.
    Any,
    /// Token audience must intersect this set. An empty set accepts nothing.
    OneOf(BTreeSet<String>),
}

impl AudiencePolicy {
    /// Build the policy from configured audiences.
    #[must_use]
    pub fn from_config(audiences: &[String], allow_any: bool) -> Self {
        let set: BTreeSet<String> = audiences
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        if set.is_empty() && allow_any {
            Self::Any
        } else {
            Self::OneOf(set)
        }
    }

    fn accepts(&self, token_audiences: &[String]) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(accepted) => token_audiences.iter().any(|a| accepted.contains(a)),
        }
    }
}

/// Everything the authorizer needs once authorization is enabled.
pub struct AuthorizerConfig {
    /// Source of verification keys.
    pub key_cache: Arc<KeyCache>,
    /// Merged scope table.
    pub scopes: Arc<ScopePolicyRegistry>,
    /// Accepted audiences.
    pub audiences: AudiencePolicy,
}

/// Raw JWT claims this authorizer understands.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    sub: String,
    /// Audience (may be a single string or an array)
    #[serde(default)]
    aud: serde_json::Value,
    exp: i64,
    /// OAuth-style space-separated scopes
    #[serde(default)]
    scope: Option<String>,
    /// Array form used by some issuers
    #[serde(default)]
    scopes: Option<Vec<String>>,
}

impl TokenClaims {
    fn granted_scopes(&self) -> ScopeSet {
        let mut granted = ScopeSet::new();
        if let Some(scope) = &self.scope {
            granted.extend(scope.split_whitespace().map(str::to_string));
        }
        if let Some(scopes) = &self.scopes {
            granted.extend(scopes.iter().cloned());
        }
        granted
    }

    fn audiences(&self) -> Vec<String> {
        match &self.aud {
            serde_json::Value::String(s) => vec![s.clone()],
            serde_json::Value::Array(arr) => arr
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Decides whether a bearer token may invoke a method.
pub struct Authorizer {
    inner: Option<AuthorizerConfig>,
}

impl Authorizer {
    /// Authorizer that verifies tokens.
    #[must_use]
    pub fn new(config: AuthorizerConfig) -> Self {
        Self {
            inner: Some(config),
        }
    }

    /// Authorizer that admits every call. Used when no key source is configured.
    #[must_use]
    pub fn insecure() -> Self {
        Self { inner: None }
    }

    /// Whether tokens are checked at all.
    #[must_use]
    pub fn is_enforcing(&self) -> bool {
        self.inner.is_some()
    }

    /// Authorize `token` for `method`.
    pub fn authorize(&self, token: Option<&str>, method: &str) -> Result<AccessClaims, AuthError> {
        let Some(config) = &self.inner else {
            return Ok(AccessClaims::anonymous());
        };

        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Unauthenticated("missing bearer token".to_string()))?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::Unauthenticated(format!("malformed token: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Unauthenticated("token header has no key id".to_string()))?;

        let keys = config.key_cache.current();
        let key = keys
            .get(&kid)
            .ok_or_else(|| AuthError::Unauthenticated(format!("unknown key id '{kid}'")))?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = key.family.algorithms();
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        validation.validate_nbf = true;
        // Audience is checked below to support string and array forms.
        validation.validate_aud = false;

        let data: TokenData<TokenClaims> =
            jsonwebtoken::decode(token, &key.decoding_key, &validation)
                .map_err(|e| AuthError::Unauthenticated(format!("token verification failed: {e}")))?;
        let claims = data.claims;

        let audiences = claims.audiences();
        if !config.audiences.accepts(&audiences) {
            return Err(AuthError::PermissionDenied(format!(
                "audience {audiences:?} is not accepted"
            )));
        }

        let required = config.scopes.required_scopes(method).ok_or_else(|| {
            AuthError::PermissionDenied(format!("no scopes are declared for {method}"))
        })?;
        let granted = claims.granted_scopes();
        if !required.iter().any(|s| granted.contains(s)) {
            return Err(AuthError::PermissionDenied(format!(
                "{method} requires one of {required:?}"
            )));
        }

        debug!(subject = %claims.sub, kid = %kid, method = %method, "Token authorized");
        Ok(AccessClaims {
            subject: claims.sub,
            scopes: granted,
            audiences,
            expires_at: Utc.timestamp_opt(claims.exp, 0).single(),
        })
    }
}
