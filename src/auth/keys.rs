//! Verification key material and the pluggable sources it comes from.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use url::Url;

use super::resolver::{FileKeyResolver, JwksKeyResolver};

/// Failure to produce a [`VerificationKeySet`].
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// A key file could not be read.
    #[error("failed to read key file {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Key material could not be parsed.
    #[error("malformed key material for '{key_id}': {reason}")]
    Malformed {
        /// Key identifier (file stem or JWK `kid`).
        key_id: String,
        /// Parser message.
        reason: String,
    },

    /// The key-set endpoint could not be reached or returned an unreadable body.
    #[error("JWKS fetch from {endpoint} failed: {source}")]
    Fetch {
        /// Endpoint URL.
        endpoint: String,
        /// Transport error.
        source: reqwest::Error,
    },

    /// The key-set endpoint answered with a non-2xx status.
    #[error("JWKS endpoint {endpoint} returned HTTP {status}")]
    Status {
        /// Endpoint URL.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// A trusted key identifier is absent from the published key set.
    #[error("key id '{0}' not present in JWKS response")]
    MissingKeyId(String),

    /// The same identifier appeared twice in one resolve.
    #[error("duplicate key id '{0}'")]
    DuplicateKeyId(String),
}

/// Signature algorithm family of a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSA (`RS*`, `PS*`)
    Rsa,
    /// NIST P-256 / P-384 (`ES256`, `ES384`)
    Ec,
    /// Ed25519 (`EdDSA`)
    Ed25519,
}

impl KeyFamily {
    /// Algorithms a token signed with this key family may declare.
    #[must_use]
    pub fn algorithms(self) -> Vec<Algorithm> {
        match self {
            Self::Rsa => vec![
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
            ],
            Self::Ec => vec![Algorithm::ES256, Algorithm::ES384],
            Self::Ed25519 => vec![Algorithm::EdDSA],
        }
    }
}

/// One trusted public key.
#[derive(Clone)]
pub struct VerificationKey {
    /// Key identifier matched against the token header `kid`.
    pub key_id: String,
    /// Algorithm family; the token algorithm is pinned to it.
    pub family: KeyFamily,
    /// Decoding key handed to `jsonwebtoken`.
    pub decoding_key: DecodingKey,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key_id", &self.key_id)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of trusted keys, replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct VerificationKeySet {
    keys: HashMap<String, VerificationKey>,
    fetched_at: Option<DateTime<Utc>>,
}

impl VerificationKeySet {
    /// The set in force before any successful resolve. Verifies nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keys: HashMap::new(),
            fetched_at: None,
        }
    }

    /// Build a set from resolved keys, stamped with the current time.
    pub fn from_keys(
        keys: impl IntoIterator<Item = VerificationKey>,
    ) -> Result<Self, ResolutionError> {
        let mut map = HashMap::new();
        for key in keys {
            if map.contains_key(&key.key_id) {
                return Err(ResolutionError::DuplicateKeyId(key.key_id));
            }
            map.insert(key.key_id.clone(), key);
        }
        Ok(Self {
            keys: map,
            fetched_at: Some(Utc::now()),
        })
    }

    /// Look a key up by identifier.
    #[must_use]
    pub fn get(&self, key_id: &str) -> Option<&VerificationKey> {
        self.keys.get(key_id)
    }

    /// Sorted key identifiers (for logging).
    #[must_use]
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// When the set was produced; `None` for the initial empty set.
    #[must_use]
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }
}

/// A source of verification keys.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Produce a fresh, complete key set.
    async fn resolve(&self) -> Result<VerificationKeySet, ResolutionError>;

    /// Human-readable description of the source (for logs).
    fn describe(&self) -> String;

    /// Whether an initial resolve failure must abort startup.
    ///
    /// Curated static sources are fatal; remote sources start empty and retry.
    fn fatal_on_startup_failure(&self) -> bool;
}

/// Where trusted keys come from. At most one source is configured per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// PEM files on local disk, keyed by file stem.
    FileBacked {
        /// Ordered key file paths.
        paths: Vec<PathBuf>,
    },
    /// Remote JWKS document, filtered to the listed key ids.
    RemoteJwks {
        /// Key-set endpoint.
        endpoint: Url,
        /// Key identifiers to trust.
        key_ids: BTreeSet<String>,
    },
}

impl CredentialSource {
    /// Build the resolver for this source.
    #[must_use]
    pub fn into_resolver(self) -> Arc<dyn KeyResolver> {
        match self {
            Self::FileBacked { paths } => Arc::new(FileKeyResolver::new(paths)),
            Self::RemoteJwks { endpoint, key_ids } => {
                Arc::new(JwksKeyResolver::new(endpoint, key_ids))
            }
        }
    }
}
