//! Server lifecycle: `Initializing -> Serving -> Draining -> Stopped`.
//!
//! [`Server::build`] performs every fallible startup step (key resolution,
//! scope merge, chain assembly, bind) so that a running server can only stop
//! by shutdown or a serve failure. [`Server::serve`] runs until SIGINT,
//! SIGTERM or cancellation of the governing token. All three feed one
//! shutdown channel that is consumed exactly once; in-flight calls are then
//! allowed to finish before the listener closes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::router::{AppState, create_router};
use crate::auth::{
    AudiencePolicy, Authorizer, AuthorizerConfig, KeyCache, ScopePolicyRegistry,
};
use crate::build;
use crate::config::Config;
use crate::rpc::{ChainOptions, Handler, PayloadValidator, standard_chain};
use crate::services::{AuxService, RidService, ScdService, ServiceModule, ServiceRouter};
use crate::store::RecordStore;
use crate::{Error, Result};

/// Lifecycle state, observable through [`Server::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Building keys, policy and chain; not yet accepting.
    Initializing,
    /// Accepting and dispatching calls.
    Serving,
    /// No longer accepting; in-flight calls finishing.
    Draining,
    /// Listener closed.
    Stopped,
}

/// Why the server began draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// OS signal (`SIGINT` or `SIGTERM`).
    Signal(&'static str),
    /// The governing cancellation token fired.
    Cancelled,
}

/// Modules registered for `config`: aux and RID always, SCD when enabled.
pub fn standard_modules(
    config: &Config,
    store: Arc<dyn RecordStore>,
) -> Vec<Arc<dyn ServiceModule>> {
    let mut modules: Vec<Arc<dyn ServiceModule>> = vec![
        Arc::new(AuxService::new()),
        Arc::new(RidService::new(Arc::clone(&store), config.locality.clone())),
    ];
    if config.enable_scd {
        modules.push(Arc::new(ScdService::new(store, config.locality.clone())));
    }
    modules
}

/// A bound, fully initialized server.
pub struct Server {
    listener: TcpListener,
    app: Router,
    key_cache: Option<Arc<KeyCache>>,
    state: Arc<watch::Sender<ServerState>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Initialize from `config` with the given service modules and bind.
    ///
    /// # Errors
    ///
    /// Configuration errors, fatal key resolution failures, conflicting scope
    /// declarations and bind failures.
    pub async fn build(config: &Config, modules: Vec<Arc<dyn ServiceModule>>) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(ServerState::Initializing);
        let state = Arc::new(state);

        let description = build::describe();
        info!(
            version = %description.version_string(),
            commit = description.commit.unwrap_or("unknown"),
            host = description.host.unwrap_or("unknown"),
            "Build"
        );

        let router = Arc::new(ServiceRouter::new(modules)?);
        let registry = ScopePolicyRegistry::merge(router.scope_declarations())?;
        info!(
            services = %router.service_names().join(","),
            methods = registry.len(),
            scd = if config.enable_scd { "enabled" } else { "disabled" },
            "Services registered"
        );

        let (authorizer, key_cache) = match config.credential_source()? {
            Some(source) => {
                let cache = Arc::new(KeyCache::new(
                    source.into_resolver(),
                    config.key_refresh_interval,
                ));
                cache.prime().await?;

                let audiences = AudiencePolicy::from_config(
                    &config.accepted_jwt_audiences,
                    config.allow_any_audience,
                );
                if matches!(&audiences, AudiencePolicy::OneOf(set) if set.is_empty()) {
                    warn!(
                        "No accepted JWT audiences configured; every token will be denied. \
                         Set accepted_jwt_audiences or allow_any_audience"
                    );
                }
                let authorizer = Authorizer::new(AuthorizerConfig {
                    key_cache: Arc::clone(&cache),
                    scopes: Arc::new(registry),
                    audiences,
                });
                (authorizer, Some(cache))
            }
            None => {
                warn!("No key source configured; operating without token authorization");
                (Authorizer::insecure(), None)
            }
        };

        let chain = standard_chain(
            Arc::new(authorizer),
            Arc::clone(&router) as Arc<dyn PayloadValidator>,
            Arc::clone(&router) as Arc<dyn Handler>,
            ChainOptions {
                dump_requests: config.dump_requests,
                timeout: Some(config.timeout),
            },
        );
        info!(stages = %chain.stage_names().join(" -> "), timeout = ?config.timeout, "Interceptor chain assembled");

        let app = create_router(Arc::new(AppState {
            chain: Arc::new(chain),
            reflection: config.reflect_api.then(|| router.describe()),
            state: state.subscribe(),
        }));

        let listener = TcpListener::bind(config.addr).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to listen at {}: {e}", config.addr),
            ))
        })?;
        info!(addr = %listener.local_addr()?, "Listening");

        Ok(Self {
            listener,
            app,
            key_cache,
            state,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Watch the lifecycle state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Serve until a signal arrives or `cancel` fires, then drain.
    ///
    /// # Errors
    ///
    /// Accept or serve failures.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let lifecycle = cancel.child_token();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<ShutdownReason>(2);

        let signals = tokio::spawn(forward_signals(shutdown_tx.clone()));
        let cancelled = {
            let lifecycle = lifecycle.clone();
            let tx = shutdown_tx;
            tokio::spawn(async move {
                lifecycle.cancelled().await;
                let _ = tx.send(ShutdownReason::Cancelled).await;
            })
        };

        let refresh = self
            .key_cache
            .as_ref()
            .map(|cache| cache.spawn_refresh(lifecycle.clone()));

        self.state.send_replace(ServerState::Serving);
        info!("Serving");

        let shutdown = {
            let state = Arc::clone(&self.state);
            let lifecycle = lifecycle.clone();
            async move {
                match shutdown_rx.recv().await {
                    Some(ShutdownReason::Signal(name)) => info!(signal = name, "Received OS signal"),
                    Some(ShutdownReason::Cancelled) => {
                        info!("Stopping server due to cancellation");
                    }
                    None => {}
                }
                state.send_replace(ServerState::Draining);
                lifecycle.cancel();
            }
        };

        let result = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await;

        lifecycle.cancel();
        signals.abort();
        join_background("cancellation forwarder", cancelled).await;
        if let Some(refresh) = refresh {
            join_background("key refresh", refresh).await;
        }
        self.state.send_replace(ServerState::Stopped);

        match result {
            Ok(()) => {
                info!("Shut down gracefully");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Server failed");
                Err(Error::Io(e))
            }
        }
    }
}

/// Await a background task; a panic or abort is logged. Returns whether it
/// finished normally.
async fn join_background(task: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(task, error = %e, panicked = e.is_panic(), "Background task failed");
            false
        }
    }
}

/// Send one [`ShutdownReason::Signal`] on SIGINT or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn forward_signals(tx: mpsc::Sender<ShutdownReason>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        () = ctrl_c => ShutdownReason::Signal("SIGINT"),
        () = terminate => ShutdownReason::Signal("SIGTERM"),
    };
    let _ = tx.send(reason).await;
}
