//! The standard interceptor stages.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::chain::{Call, CallResult, Interceptor, Next};
use super::status::{Code, INTERNAL_MESSAGE, Status};
use super::validation::{PayloadValidator, require_object};
use crate::auth::Authorizer;

/// Outermost stage: every failure leaves the chain as a taxonomy code.
///
/// Internal and unclassified failures (including panics in later stages) are
/// logged with their full cause and replaced by a generic `INTERNAL` status.
/// Other statuses pass through with their cause stripped.
#[derive(Debug, Default)]
pub struct ErrorNormalizer;

#[async_trait]
impl Interceptor for ErrorNormalizer {
    fn name(&self) -> &'static str {
        "errors"
    }

    async fn intercept(&self, call: Call, next: Next) -> CallResult {
        let method = call.method.clone();
        let outcome = AssertUnwindSafe(next.run(call)).catch_unwind().await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => Err(normalize(&method, status)),
            Err(panic) => {
                error!(method = %method, panic = %panic_message(&*panic), "Handler panicked");
                Err(Status::new(Code::Internal, INTERNAL_MESSAGE))
            }
        }
    }
}

fn normalize(method: &str, status: Status) -> Status {
    match status.code() {
        Code::Internal | Code::Unknown => {
            match status.cause() {
                Some(cause) => error!(method = %method, error = %format!("{cause:#}"), "Internal error"),
                None => error!(method = %method, message = %status.message(), "Internal error"),
            }
            Status::new(Code::Internal, INTERNAL_MESSAGE)
        }
        _ => status.without_cause(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Call identifier: `dss-` followed by a random UUID.
fn new_call_id() -> String {
    format!("dss-{}", Uuid::new_v4())
}

/// Assigns a call ID and logs every call with its final outcome and latency.
///
/// The ID is stored on [`Call::call_id`] for inner stages and recorded on the
/// `rpc` span that wraps them.
#[derive(Debug, Default)]
pub struct RequestLogger;

#[async_trait]
impl Interceptor for RequestLogger {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn intercept(&self, mut call: Call, next: Next) -> CallResult {
        let call_id = new_call_id();
        call.call_id = Some(call_id.clone());
        let method = call.method.clone();
        let span = info_span!("rpc", call_id = %call_id, method = %method);
        let started = Instant::now();

        let result = next.run(call).instrument(span.clone()).await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        span.in_scope(|| match &result {
            Ok(_) => info!(code = "OK", elapsed_ms, "Call completed"),
            Err(status) => warn!(
                code = %status.code(),
                message = %status.message(),
                elapsed_ms,
                "Call failed"
            ),
        });
        result
    }
}

/// Bounds the remaining stages and the handler by the per-call timeout.
///
/// Sits below [`RequestLogger`], so an expired call is logged and normalized
/// like any other failure.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    timeout: Duration,
}

impl Deadline {
    /// Deadline of `timeout` per call.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Interceptor for Deadline {
    fn name(&self) -> &'static str {
        "deadline"
    }

    async fn intercept(&self, call: Call, next: Next) -> CallResult {
        let method = call.method.clone();
        if let Ok(result) = tokio::time::timeout(self.timeout, next.run(call)).await {
            return result;
        }
        warn!(method = %method, timeout = ?self.timeout, "Call exceeded deadline");
        Err(Status::deadline_exceeded(format!(
            "call did not complete within {}",
            humantime::format_duration(self.timeout)
        )))
    }
}

/// Verifies the bearer token for the invoked method and attaches claims.
pub struct AuthInterceptor {
    authorizer: Arc<Authorizer>,
}

impl AuthInterceptor {
    /// Wrap an authorizer.
    #[must_use]
    pub fn new(authorizer: Arc<Authorizer>) -> Self {
        Self { authorizer }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn intercept(&self, mut call: Call, next: Next) -> CallResult {
        let claims = self
            .authorizer
            .authorize(call.token.as_deref(), &call.method)?;
        call.claims = Some(claims);
        next.run(call).await
    }
}

/// Structural payload validation; runs only after authorization succeeded.
pub struct ValidationInterceptor {
    validator: Arc<dyn PayloadValidator>,
}

impl ValidationInterceptor {
    /// Validate with per-method rules from `validator`.
    #[must_use]
    pub fn new(validator: Arc<dyn PayloadValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Interceptor for ValidationInterceptor {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn intercept(&self, call: Call, next: Next) -> CallResult {
        require_object(&call.payload)?;
        self.validator.validate(&call.method, &call.payload)?;
        next.run(call).await
    }
}

/// Logs request payloads and responses. Enabled by `dump_requests`.
#[derive(Debug, Default)]
pub struct DumpInterceptor;

#[async_trait]
impl Interceptor for DumpInterceptor {
    fn name(&self) -> &'static str {
        "dump"
    }

    async fn intercept(&self, call: Call, next: Next) -> CallResult {
        let method = call.method.clone();
        let call_id = call.call_id.clone();
        info!(method = %method, call_id = ?call_id, request = %call.payload, "Request");
        let result = next.run(call).await;
        let response: Value = match &result {
            Ok(body) => body.clone(),
            Err(status) => json!(status.body()),
        };
        info!(method = %method, call_id = ?call_id, response = %response, "Response");
        result
    }
}
