//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use tokio::sync::watch;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::debug;

use super::lifecycle::ServerState;
use crate::rpc::{Call, InterceptorChain, Status};
use crate::services::ServiceDescription;

/// Shared application state
pub struct AppState {
    /// Admission chain ending in the service router
    pub chain: Arc<InterceptorChain>,
    /// Service listing, present when reflection is enabled
    pub reflection: Option<Vec<ServiceDescription>>,
    /// Lifecycle state, for health reporting
    pub state: watch::Receiver<ServerState>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/healthy", get(healthy_handler))
        .route("/{service}/{method}", post(rpc_handler));
    if state.reflection.is_some() {
        router = router.route("/reflection", get(reflection_handler));
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `ok` while serving, 503 otherwise
async fn healthy_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let current = *state.state.borrow();
    match current {
        ServerState::Serving => (StatusCode::OK, "ok"),
        ServerState::Initializing => (StatusCode::SERVICE_UNAVAILABLE, "initializing"),
        ServerState::Draining | ServerState::Stopped => {
            (StatusCode::SERVICE_UNAVAILABLE, "draining")
        }
    }
}

async fn reflection_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.reflection {
        Some(services) => Json(services).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `POST /{package.Service}/{Method}`: dispatch one call through the chain
async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let full_method = format!("/{service}/{method}");

    // Keep-alive connections can still deliver calls after draining begins.
    let current = *state.state.borrow();
    if current != ServerState::Serving {
        debug!(method = %full_method, state = ?current, "Rejecting call while not serving");
        let message = match current {
            ServerState::Initializing => "server is starting",
            _ => "server is shutting down",
        };
        return status_response(&Status::unavailable(message));
    }

    let payload = decode_payload(&full_method, &body);

    let mut call = Call::new(full_method, payload);
    call.token = bearer_token(&headers);

    match state.chain.dispatch(call).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(status) => status_response(&status),
    }
}

/// Empty body is `{}`. Undecodable bodies become `null`, which payload
/// validation rejects after authorization has run.
fn decode_payload(method: &str, body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!(method = %method, error = %e, "Request body is not JSON");
        Value::Null
    })
}

/// Token from `Authorization: Bearer <token>`; the scheme is case-insensitive.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim_start().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn status_response(status: &Status) -> Response {
    let mut response = (status.code().http_status(), Json(status.body())).into_response();
    if status.code() == crate::rpc::Code::Unauthenticated {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
    }
    response
}
