//! Auxiliary service: build version and token checks.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ServiceModule, full_method};
use crate::auth::ScopeDeclaration;
use crate::build;
use crate::rpc::validation::require_str;
use crate::rpc::{Call, CallResult, Status, ValidationError};
use crate::services::{rid, scd};

/// Service name.
pub const SERVICE: &str = "auxpb.DSSAuxService";

/// Aux module. Stateless.
#[derive(Debug, Default)]
pub struct AuxService;

impl AuxService {
    /// New aux module.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceModule for AuxService {
    fn service_name(&self) -> &'static str {
        SERVICE
    }

    fn auth_scopes(&self) -> ScopeDeclaration {
        ScopeDeclaration::new("aux")
            .method(
                full_method(SERVICE, "GetVersion"),
                [rid::READ_SCOPE, scd::STRATEGIC_COORDINATION_SCOPE],
            )
            .method(full_method(SERVICE, "ValidateOauth"), [rid::READ_SCOPE])
    }

    fn validate(&self, method: &str, payload: &Value) -> Result<(), ValidationError> {
        if method == "ValidateOauth" && payload.get("owner").is_some() {
            require_str(payload, "owner")?;
        }
        Ok(())
    }

    async fn handle(&self, method: &str, call: &Call) -> CallResult {
        match method {
            "GetVersion" => Ok(json!({
                "version": { "as_string": build::describe().version_string() }
            })),
            "ValidateOauth" => {
                let expected = call.payload.get("owner").and_then(Value::as_str);
                let subject = call.claims.as_ref().map(|c| c.subject.as_str());
                match expected {
                    Some(owner) if Some(owner) != subject => Err(Status::permission_denied(
                        format!("token subject does not match owner {owner}"),
                    )),
                    _ => Ok(json!({})),
                }
            }
            other => Err(Status::unimplemented(format!("{SERVICE}/{other} is not served"))),
        }
    }
}
