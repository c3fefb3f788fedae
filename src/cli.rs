//! Command-line interface

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::config::Config;

/// DSS backend: RID and SCD services behind token admission
#[derive(Parser, Debug, Default)]
#[command(name = "dss-backend")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "DSS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "DSS_ADDR")]
    pub addr: Option<SocketAddr>,

    /// PEM public keys for token verification, separated by commas
    #[arg(long, env = "DSS_PUBLIC_KEY_FILES", value_delimiter = ',')]
    pub public_key_files: Vec<PathBuf>,

    /// URL of an endpoint serving a JWKS
    #[arg(long, env = "DSS_JWKS_ENDPOINT")]
    pub jwks_endpoint: Option<Url>,

    /// Key ids to trust from the JWKS, separated by commas
    #[arg(long, env = "DSS_JWKS_KEY_IDS", value_delimiter = ',')]
    pub jwks_key_ids: Vec<String>,

    /// How often verification keys are refreshed (e.g. 1m, 30s)
    #[arg(long, env = "DSS_KEY_REFRESH_INTERVAL", value_parser = humantime::parse_duration)]
    pub key_refresh_interval: Option<Duration>,

    /// Acceptable JWT `aud` claims, separated by commas
    #[arg(long, env = "DSS_ACCEPTED_JWT_AUDIENCES", value_delimiter = ',')]
    pub accepted_jwt_audiences: Vec<String>,

    /// Accept tokens for any audience when no audiences are configured
    #[arg(long, env = "DSS_ALLOW_ANY_AUDIENCE")]
    pub allow_any_audience: bool,

    /// Timeout for each call (e.g. 10s)
    #[arg(long, env = "DSS_TIMEOUT", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Enable the strategic conflict detection API
    #[arg(long, env = "DSS_ENABLE_SCD")]
    pub enable_scd: bool,

    /// Self-identification recorded as the writer of stored entities
    #[arg(long, env = "DSS_LOCALITY")]
    pub locality: Option<String>,

    /// Log request and response bodies
    #[arg(long, env = "DSS_DUMP_REQUESTS")]
    pub dump_requests: bool,

    /// Serve the API reflection endpoint
    #[arg(long, env = "DSS_REFLECT_API")]
    pub reflect_api: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DSS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, env = "DSS_LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl Cli {
    /// Overlay flags that were given onto `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if !self.public_key_files.is_empty() {
            config.public_key_files.clone_from(&self.public_key_files);
        }
        if let Some(endpoint) = &self.jwks_endpoint {
            config.jwks_endpoint = Some(endpoint.clone());
        }
        if !self.jwks_key_ids.is_empty() {
            config.jwks_key_ids.clone_from(&self.jwks_key_ids);
        }
        if let Some(interval) = self.key_refresh_interval {
            config.key_refresh_interval = interval;
        }
        if !self.accepted_jwt_audiences.is_empty() {
            config
                .accepted_jwt_audiences
                .clone_from(&self.accepted_jwt_audiences);
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(locality) = &self.locality {
            config.locality.clone_from(locality);
        }
        if let Some(level) = &self.log_level {
            config.log.level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.log.format.clone_from(format);
        }
        config.allow_any_audience |= self.allow_any_audience;
        config.enable_scd |= self.enable_scd;
        config.dump_requests |= self.dump_requests;
        config.reflect_api |= self.reflect_api;
    }
}
