//! Key resolvers: static PEM files and a remote JWKS endpoint.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use tracing::{debug, warn};
use url::Url;

use super::keys::{KeyFamily, KeyResolver, ResolutionError, VerificationKey, VerificationKeySet};

/// Upper bound on a single JWKS fetch.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves keys from PEM files; each file is keyed by its stem.
///
/// All files must load: the file list is curated, so a partial set is an error.
#[derive(Debug, Clone)]
pub struct FileKeyResolver {
    paths: Vec<PathBuf>,
}

impl FileKeyResolver {
    /// Create a resolver over `paths`.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl KeyResolver for FileKeyResolver {
    async fn resolve(&self) -> Result<VerificationKeySet, ResolutionError> {
        let mut keys = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let pem = tokio::fs::read(path)
                .await
                .map_err(|source| ResolutionError::Read {
                    path: path.clone(),
                    source,
                })?;
            let key_id = key_id_from_path(path);
            let (family, decoding_key) = parse_pem(&key_id, &pem)?;
            debug!(key_id = %key_id, path = %path.display(), ?family, "Loaded public key file");
            keys.push(VerificationKey {
                key_id,
                family,
                decoding_key,
            });
        }
        VerificationKeySet::from_keys(keys)
    }

    fn describe(&self) -> String {
        let paths: Vec<String> = self.paths.iter().map(|p| p.display().to_string()).collect();
        format!("files[{}]", paths.join(","))
    }

    fn fatal_on_startup_failure(&self) -> bool {
        true
    }
}

/// `keys/k1.pem` -> `k1`.
fn key_id_from_path(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned())
}

/// Parse a PEM public key, trying RSA, then EC, then Ed25519.
fn parse_pem(key_id: &str, pem: &[u8]) -> Result<(KeyFamily, DecodingKey), ResolutionError> {
    if let Ok(key) = DecodingKey::from_rsa_pem(pem) {
        return Ok((KeyFamily::Rsa, key));
    }
    if let Ok(key) = DecodingKey::from_ec_pem(pem) {
        return Ok((KeyFamily::Ec, key));
    }
    DecodingKey::from_ed_pem(pem)
        .map(|key| (KeyFamily::Ed25519, key))
        .map_err(|e| ResolutionError::Malformed {
            key_id: key_id.to_string(),
            reason: format!("not an RSA, EC or Ed25519 public key: {e}"),
        })
}

/// Resolves keys from a JWKS document, keeping only the configured key ids.
pub struct JwksKeyResolver {
    endpoint: Url,
    key_ids: BTreeSet<String>,
    http: reqwest::Client,
}

impl JwksKeyResolver {
    /// Create a resolver for `endpoint`, trusting only `key_ids`.
    #[must_use]
    pub fn new(endpoint: Url, key_ids: BTreeSet<String>) -> Self {
        if endpoint.scheme() != "https" {
            warn!(endpoint = %endpoint, "JWKS endpoint is not HTTPS");
        }
        Self {
            endpoint,
            key_ids,
            http: reqwest::Client::builder()
                .timeout(JWKS_FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn fetch(&self) -> Result<JwkSet, ResolutionError> {
        let endpoint = self.endpoint.to_string();
        let response = self
            .http
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|source| ResolutionError::Fetch {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| ResolutionError::Fetch {
                endpoint: endpoint.clone(),
                source,
            })?;
        serde_json::from_slice(&body).map_err(|e| ResolutionError::Malformed {
            key_id: endpoint,
            reason: format!("invalid JWK set document: {e}"),
        })
    }
}

#[async_trait]
impl KeyResolver for JwksKeyResolver {
    async fn resolve(&self) -> Result<VerificationKeySet, ResolutionError> {
        let jwks = self.fetch().await?;

        let mut keys = Vec::with_capacity(self.key_ids.len());
        for kid in &self.key_ids {
            let jwk = jwks
                .keys
                .iter()
                .find(|jwk| jwk.common.key_id.as_deref() == Some(kid.as_str()))
                .ok_or_else(|| ResolutionError::MissingKeyId(kid.clone()))?;
            let (family, decoding_key) = parse_jwk(kid, jwk)?;
            keys.push(VerificationKey {
                key_id: kid.clone(),
                family,
                decoding_key,
            });
        }

        debug!(
            endpoint = %self.endpoint,
            published = jwks.keys.len(),
            trusted = keys.len(),
            "Resolved JWKS"
        );
        VerificationKeySet::from_keys(keys)
    }

    fn describe(&self) -> String {
        let ids: Vec<&str> = self.key_ids.iter().map(String::as_str).collect();
        format!("jwks[{} kids={}]", self.endpoint, ids.join(","))
    }

    fn fatal_on_startup_failure(&self) -> bool {
        false
    }
}

/// Convert a published JWK into key material. Symmetric keys are refused.
fn parse_jwk(kid: &str, jwk: &Jwk) -> Result<(KeyFamily, DecodingKey), ResolutionError> {
    let family = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => KeyFamily::Rsa,
        AlgorithmParameters::EllipticCurve(_) => KeyFamily::Ec,
        AlgorithmParameters::OctetKeyPair(_) => KeyFamily::Ed25519,
        AlgorithmParameters::OctetKey(_) => {
            return Err(ResolutionError::Malformed {
                key_id: kid.to_string(),
                reason: "symmetric keys cannot be trusted for verification".to_string(),
            });
        }
    };
    let key = DecodingKey::from_jwk(jwk).map_err(|e| ResolutionError::Malformed {
        key_id: kid.to_string(),
        reason: e.to_string(),
    })?;
    Ok((family, key))
}
