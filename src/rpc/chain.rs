//! Interceptor chain.
//!
//! The chain is an ordered list of [`Interceptor`] stages wrapped around a
//! terminal [`Handler`]. Each stage receives the call and a [`Next`]; it may
//! run the rest of the chain (`next.run(call)`) or return early. Either way
//! the result unwinds back through every outer stage.
//!
//! ```text
//! dispatch ─► errors ─► logging ─► deadline ─► auth ─► validation ─► [dump] ─► handler
//!    ◄──────────◄──────────◄───────────◄──────────◄────────◄─────────────◄────────┘
//! ```
//!
//! The deadline is itself a stage, so an expired call still unwinds through
//! logging and error normalization.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::status::Status;
use crate::auth::AccessClaims;

/// Result of a call: a JSON response or a status.
pub type CallResult = Result<Value, Status>;

/// One inbound remote procedure call.
#[derive(Debug, Clone)]
pub struct Call {
    /// Fully-qualified method, e.g. `/ridpb.DiscoveryAndSynchronizationService/GetSubscription`.
    pub method: String,
    /// Bearer token from the `Authorization` header.
    pub token: Option<String>,
    /// Decoded request payload.
    pub payload: Value,
    /// Per-call identifier, set by the logging stage.
    pub call_id: Option<String>,
    /// Claims attached by the authorization stage.
    pub claims: Option<AccessClaims>,
}

impl Call {
    /// New call with no token.
    pub fn new(method: impl Into<String>, payload: Value) -> Self {
        Self {
            method: method.into(),
            token: None,
            payload,
            call_id: None,
            claims: None,
        }
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// `(service, method)` split of [`Call::method`].
    #[must_use]
    pub fn service_and_method(&self) -> Option<(&str, &str)> {
        split_method(&self.method)
    }
}

/// Split `/pkg.Service/Method` into `("pkg.Service", "Method")`.
#[must_use]
pub fn split_method(full: &str) -> Option<(&str, &str)> {
    let rest = full.strip_prefix('/')?;
    let (service, method) = rest.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

/// Terminal call handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Serve the call.
    async fn call(&self, call: Call) -> CallResult;
}

/// One middleware stage.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Stage name, for logs.
    fn name(&self) -> &'static str;

    /// Handle `call`, usually by delegating to `next`.
    async fn intercept(&self, call: Call, next: Next) -> CallResult;
}

/// The remainder of the chain after the current stage.
pub struct Next {
    stages: Arc<[Arc<dyn Interceptor>]>,
    index: usize,
    handler: Arc<dyn Handler>,
}

impl Next {
    /// Run the remaining stages and the handler.
    pub async fn run(self, call: Call) -> CallResult {
        match self.stages.get(self.index) {
            Some(stage) => {
                let stage = Arc::clone(stage);
                let next = Self {
                    stages: Arc::clone(&self.stages),
                    index: self.index + 1,
                    handler: self.handler,
                };
                stage.intercept(call, next).await
            }
            None => self.handler.call(call).await,
        }
    }
}

/// Fixed stage order wrapped around a handler; composed once at startup.
#[derive(Clone)]
pub struct InterceptorChain {
    stages: Arc<[Arc<dyn Interceptor>]>,
    handler: Arc<dyn Handler>,
}

impl InterceptorChain {
    /// Compose `stages` (outermost first) around `handler`.
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Interceptor>>, handler: Arc<dyn Handler>) -> Self {
        Self {
            stages: stages.into(),
            handler,
        }
    }

    /// Stage names, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run `call` through the chain.
    pub async fn dispatch(&self, call: Call) -> CallResult {
        let next = Next {
            stages: Arc::clone(&self.stages),
            index: 0,
            handler: Arc::clone(&self.handler),
        };
        next.run(call).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::rpc::Code;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        deny: bool,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn intercept(&self, call: Call, next: Next) -> CallResult {
            self.log.lock().unwrap().push(format!("enter {}", self.name));
            let result = if self.deny {
                Err(Status::permission_denied(self.name))
            } else {
                next.run(call).await
            };
            self.log.lock().unwrap().push(format!("exit {}", self.name));
            result
        }
    }

    struct Echo(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, call: Call) -> CallResult {
            self.0.lock().unwrap().push("handler".to_string());
            Ok(call.payload)
        }
    }

    fn chain(deny_at: Option<&'static str>, log: &Arc<Mutex<Vec<String>>>) -> InterceptorChain {
        let stages: Vec<Arc<dyn Interceptor>> = ["outer", "middle", "inner"]
            .into_iter()
            .map(|name| {
                Arc::new(Recorder {
                    name,
                    log: Arc::clone(log),
                    deny: deny_at == Some(name),
                }) as Arc<dyn Interceptor>
            })
            .collect();
        InterceptorChain::new(stages, Arc::new(Echo(Arc::clone(log))))
    }

    #[tokio::test]
    async fn stages_run_in_order_and_unwind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = chain(None, &log)
            .dispatch(Call::new("/s.S/M", json!({"a": 1})))
            .await
            .unwrap();

        assert_eq!(result, json!({"a": 1}));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "enter outer",
                "enter middle",
                "enter inner",
                "handler",
                "exit inner",
                "exit middle",
                "exit outer"
            ]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_stages_but_unwinds_outer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = chain(Some("middle"), &log)
            .dispatch(Call::new("/s.S/M", json!({})))
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::PermissionDenied);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["enter outer", "enter middle", "exit middle", "exit outer"]
        );
    }

    #[test]
    fn split_method_parses_qualified_names() {
        assert_eq!(split_method("/pkg.Svc/Get"), Some(("pkg.Svc", "Get")));
        assert_eq!(split_method("pkg.Svc/Get"), None);
        assert_eq!(split_method("/pkg.Svc/"), None);
        assert_eq!(split_method("/pkg.Svc/Get/extra"), None);
    }
}
