//! Configuration management

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::auth::{CredentialSource, DEFAULT_REFRESH_INTERVAL};
use crate::{Error, Result};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address
    pub addr: SocketAddr,
    /// PEM files holding token verification keys
    #[serde(deserialize_with = "comma_list")]
    pub public_key_files: Vec<PathBuf>,
    /// Remote JWKS endpoint
    pub jwks_endpoint: Option<Url>,
    /// Key ids trusted from the JWKS endpoint
    #[serde(deserialize_with = "comma_list")]
    pub jwks_key_ids: Vec<String>,
    /// How often verification keys are re-resolved
    #[serde(with = "humantime_serde")]
    pub key_refresh_interval: Duration,
    /// Accepted `aud` claim values
    #[serde(deserialize_with = "comma_list")]
    pub accepted_jwt_audiences: Vec<String>,
    /// Accept any audience when no audiences are configured
    pub allow_any_audience: bool,
    /// Per-call timeout covering the whole interceptor chain
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Register the strategic conflict detection service
    pub enable_scd: bool,
    /// Writer identity recorded with stored entities
    pub locality: String,
    /// Log request and response bodies
    pub dump_requests: bool,
    /// Serve the reflection endpoint
    pub reflect_api: bool,
    /// Logging
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            public_key_files: Vec::new(),
            jwks_endpoint: None,
            jwks_key_ids: Vec::new(),
            key_refresh_interval: DEFAULT_REFRESH_INTERVAL,
            accepted_jwt_audiences: Vec::new(),
            allow_any_audience: false,
            timeout: DEFAULT_TIMEOUT,
            enable_scd: false,
            locality: String::new(),
            dump_requests: false,
            reflect_api: false,
            log: LogConfig::default(),
        }
    }
}

/// Lists accept a YAML sequence or a comma-separated string (as set from env).
fn comma_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| T::from(s.to_string()))
            .collect(),
        OneOrMany::Many(items) => items.into_iter().map(T::from).collect(),
    })
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `dss_backend=debug`
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // DSS_ prefix, `__` separates nested keys (DSS_LOG__LEVEL)
        figment = figment.merge(Env::prefixed("DSS_").split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values that would only fail once the server is running.
    ///
    /// # Errors
    ///
    /// A zero key refresh interval or a zero per-call timeout.
    pub fn validate(&self) -> Result<()> {
        if self.key_refresh_interval.is_zero() {
            return Err(Error::Config(
                "key_refresh_interval must be greater than zero".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// The key source this configuration selects; `None` means insecure mode.
    ///
    /// # Errors
    ///
    /// Both a file source and a JWKS endpoint, a JWKS endpoint without key
    /// ids, or key ids without an endpoint.
    pub fn credential_source(&self) -> Result<Option<CredentialSource>> {
        let files: Vec<PathBuf> = self
            .public_key_files
            .iter()
            .filter(|p| !p.as_os_str().is_empty())
            .cloned()
            .collect();
        let key_ids: BTreeSet<String> = self
            .jwks_key_ids
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        match (files.is_empty(), &self.jwks_endpoint) {
            (false, Some(_)) => Err(Error::Config(
                "public_key_files and jwks_endpoint are mutually exclusive".to_string(),
            )),
            (false, None) => Ok(Some(CredentialSource::FileBacked { paths: files })),
            (true, Some(endpoint)) if key_ids.is_empty() => Err(Error::Config(format!(
                "jwks_endpoint {endpoint} requires jwks_key_ids"
            ))),
            (true, Some(endpoint)) => Ok(Some(CredentialSource::RemoteJwks {
                endpoint: endpoint.clone(),
                key_ids,
            })),
            (true, None) if !key_ids.is_empty() => Err(Error::Config(
                "jwks_key_ids requires jwks_endpoint".to_string(),
            )),
            (true, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.addr.port(), 8081);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.key_refresh_interval, Duration::from_secs(60));
        assert!(!config.enable_scd);
        assert!(config.credential_source().unwrap().is_none());
    }

    #[test]
    fn load_yaml_with_humantime_durations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "addr: 127.0.0.1:9000\n\
             public_key_files: [/etc/dss/k1.pem]\n\
             key_refresh_interval: 5m\n\
             timeout: 2s\n\
             accepted_jwt_audiences: [dss.example.com]\n\
             enable_scd: true\n\
             log:\n  format: json"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.key_refresh_interval, Duration::from_secs(300));
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.accepted_jwt_audiences, vec!["dss.example.com"]);
        assert!(config.enable_scd);
        assert_eq!(config.log.format, "json");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn comma_separated_lists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "jwks_endpoint: https://auth.example/.well-known/jwks.json\n\
             jwks_key_ids: \"k1, k2\"\n\
             accepted_jwt_audiences: \"a.example,b.example\""
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.jwks_key_ids, vec!["k1", "k2"]);
        assert_eq!(config.accepted_jwt_audiences, vec!["a.example", "b.example"]);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/dss.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_durations_rejected() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            key_refresh_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config {
            timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_duration_from_yaml_loads_but_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "key_refresh_interval: 0s").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.key_refresh_interval, Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn file_source_selected() {
        let config = Config {
            public_key_files: vec![PathBuf::from("k1.pem")],
            ..Config::default()
        };
        assert_eq!(
            config.credential_source().unwrap(),
            Some(CredentialSource::FileBacked {
                paths: vec![PathBuf::from("k1.pem")]
            })
        );
    }

    #[test]
    fn both_sources_rejected() {
        let config = Config {
            public_key_files: vec![PathBuf::from("k1.pem")],
            jwks_endpoint: Some("https://auth.example/jwks".parse().unwrap()),
            jwks_key_ids: vec!["k1".into()],
            ..Config::default()
        };
        assert!(matches!(config.credential_source(), Err(Error::Config(_))));
    }

    #[test]
    fn jwks_needs_key_ids() {
        let mut config = Config {
            jwks_endpoint: Some("https://auth.example/jwks".parse().unwrap()),
            jwks_key_ids: vec![" ".into()],
            ..Config::default()
        };
        assert!(matches!(config.credential_source(), Err(Error::Config(_))));

        config.jwks_key_ids = vec!["k1".into(), "k2".into()];
        match config.credential_source().unwrap() {
            Some(CredentialSource::RemoteJwks { key_ids, .. }) => {
                assert_eq!(key_ids.into_iter().collect::<Vec<_>>(), vec!["k1", "k2"]);
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn key_ids_without_endpoint_rejected() {
        let config = Config {
            jwks_key_ids: vec!["k1".into()],
            ..Config::default()
        };
        assert!(matches!(config.credential_source(), Err(Error::Config(_))));
    }
}
