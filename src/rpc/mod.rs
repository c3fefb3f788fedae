//! Call model, status taxonomy and the interceptor chain.

pub mod chain;
pub mod interceptors;
pub mod status;
pub mod validation;

use std::sync::Arc;

pub use chain::{Call, CallResult, Handler, Interceptor, InterceptorChain, Next, split_method};
pub use interceptors::{
    AuthInterceptor, Deadline, DumpInterceptor, ErrorNormalizer, RequestLogger,
    ValidationInterceptor,
};
pub use status::{Code, Status, StatusBody};
pub use validation::{PayloadValidator, ValidationError};

use crate::auth::Authorizer;

/// Options for [`standard_chain`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainOptions {
    /// Append the request/response dump stage.
    pub dump_requests: bool,
    /// Per-call timeout.
    pub timeout: Option<std::time::Duration>,
}

/// Compose the fixed admission pipeline:
/// errors -> logging -> [deadline] -> auth -> validation -> [dump] -> handler.
pub fn standard_chain(
    authorizer: Arc<Authorizer>,
    validator: Arc<dyn PayloadValidator>,
    handler: Arc<dyn Handler>,
    options: ChainOptions,
) -> InterceptorChain {
    let mut stages: Vec<Arc<dyn Interceptor>> =
        vec![Arc::new(ErrorNormalizer), Arc::new(RequestLogger)];
    if let Some(timeout) = options.timeout {
        stages.push(Arc::new(Deadline::new(timeout)));
    }
    stages.push(Arc::new(AuthInterceptor::new(authorizer)));
    stages.push(Arc::new(ValidationInterceptor::new(validator)));
    if options.dump_requests {
        stages.push(Arc::new(DumpInterceptor));
    }

    InterceptorChain::new(stages, handler)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;

    struct Nothing;

    #[async_trait]
    impl Handler for Nothing {
        async fn call(&self, _call: Call) -> CallResult {
            Ok(Value::Null)
        }
    }

    impl PayloadValidator for Nothing {
        fn validate(&self, _method: &str, _payload: &Value) -> Result<(), ValidationError> {
            Ok(())
        }
    }

    fn names(options: ChainOptions) -> Vec<&'static str> {
        standard_chain(
            Arc::new(Authorizer::insecure()),
            Arc::new(Nothing),
            Arc::new(Nothing),
            options,
        )
        .stage_names()
    }

    #[test]
    fn deadline_sits_below_logging() {
        assert_eq!(
            names(ChainOptions {
                dump_requests: true,
                timeout: Some(std::time::Duration::from_secs(10)),
            }),
            vec!["errors", "logging", "deadline", "auth", "validation", "dump"]
        );
        assert_eq!(
            names(ChainOptions::default()),
            vec!["errors", "logging", "auth", "validation"]
        );
    }
}
