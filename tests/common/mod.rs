//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dss_backend::auth::{
    AudiencePolicy, Authorizer, AuthorizerConfig, FileKeyResolver, KeyCache, ScopeDeclaration,
    ScopePolicyRegistry,
};
use dss_backend::config::Config;
use dss_backend::server::{Server, ServerState};
use dss_backend::services::ServiceModule;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const AUDIENCE: &str = "dss.example.com";

/// Path of a file under `tests/fixtures`.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims for `subject` holding `scope`, valid for an hour.
pub fn claims(subject: &str, scope: &str) -> Value {
    json!({
        "sub": subject,
        "aud": AUDIENCE,
        "scope": scope,
        "iat": now(),
        "exp": now() + 3600,
    })
}

/// RS256 token signed with the private key of `signer` (`k1` or `k2`),
/// carrying `kid` in its header.
pub fn mint(signer: &str, kid: Option<&str>, claims: &Value) -> String {
    let pem = std::fs::read(fixture(&format!("{signer}.key.pem"))).unwrap();
    let key = EncodingKey::from_rsa_pem(&pem).unwrap();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// Key cache trusting the given public key files, primed.
pub async fn file_cache(names: &[&str]) -> Arc<KeyCache> {
    let paths = names.iter().map(|n| fixture(n)).collect();
    let cache = Arc::new(KeyCache::new(
        Arc::new(FileKeyResolver::new(paths)),
        Duration::from_secs(60),
    ));
    cache.prime().await.unwrap();
    cache
}

/// Enforcing authorizer over `cache` with `declarations` and [`AUDIENCE`].
pub fn authorizer(cache: Arc<KeyCache>, declarations: Vec<ScopeDeclaration>) -> Authorizer {
    Authorizer::new(AuthorizerConfig {
        key_cache: cache,
        scopes: Arc::new(ScopePolicyRegistry::merge(declarations).unwrap()),
        audiences: AudiencePolicy::from_config(&[AUDIENCE.to_string()], false),
    })
}

/// Config bound to an ephemeral local port, trusting the given public key
/// files and accepting [`AUDIENCE`].
pub fn config(keys: &[&str]) -> Config {
    Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        public_key_files: keys.iter().map(|k| fixture(k)).collect(),
        accepted_jwt_audiences: vec![AUDIENCE.to_string()],
        ..Config::default()
    }
}

/// A server running in the background.
pub struct Running {
    pub base: String,
    pub cancel: CancellationToken,
    pub state: watch::Receiver<ServerState>,
    pub handle: JoinHandle<dss_backend::Result<()>>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Cancel and wait for the server to stop.
    pub async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Build and serve `modules` under `config`, returning once it is serving.
pub async fn start(config: &Config, modules: Vec<Arc<dyn ServiceModule>>) -> Running {
    let server = Server::build(config, modules).await.unwrap();
    let base = format!("http://{}", server.local_addr().unwrap());
    let mut state = server.state();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.serve(cancel.clone()));
    state
        .wait_for(|s| *s == ServerState::Serving)
        .await
        .unwrap();
    Running {
        base,
        cancel,
        state,
        handle,
    }
}
