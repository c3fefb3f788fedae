//! Service modules and the router that dispatches calls to them.
//!
//! Each module serves one RPC service, declares which scopes every one of its
//! methods requires, and validates its own payloads. The [`ServiceRouter`] is
//! the terminal handler of the interceptor chain.
//!
//! ```text
//! chain ─► ServiceRouter ─┬─► aux  (auxpb.DSSAuxService)
//!                         ├─► rid  (ridpb.DiscoveryAndSynchronizationService)
//!                         └─► scd  (scdpb.UTMAPIUSSDSSAndUSSUSSService, optional)
//! ```

pub mod auxiliary;
mod records;
pub mod rid;
pub mod scd;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use auxiliary::AuxService;
pub use rid::RidService;
pub use scd::ScdService;

use crate::auth::{ScopeDeclaration, ScopeSet};
use crate::rpc::{Call, CallResult, Handler, PayloadValidator, Status, ValidationError, split_method};
use crate::{Error, Result};

/// One RPC service.
#[async_trait]
pub trait ServiceModule: Send + Sync + 'static {
    /// Fully-qualified service name, e.g. `auxpb.DSSAuxService`.
    fn service_name(&self) -> &'static str;

    /// Scope requirements keyed by fully-qualified method name.
    fn auth_scopes(&self) -> ScopeDeclaration;

    /// Structural checks for `method` (short name); runs after authorization.
    fn validate(&self, method: &str, payload: &Value) -> std::result::Result<(), ValidationError> {
        let _ = (method, payload);
        Ok(())
    }

    /// Serve `method` (short name).
    async fn handle(&self, method: &str, call: &Call) -> CallResult;
}

/// `/service/method` for a short method name.
#[must_use]
pub fn full_method(service: &str, method: &str) -> String {
    format!("/{service}/{method}")
}

/// A method as listed by reflection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodDescription {
    /// Short method name.
    pub name: String,
    /// Scopes of which the token must hold at least one.
    pub scopes: ScopeSet,
}

/// A service as listed by reflection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescription {
    /// Fully-qualified service name.
    pub name: String,
    /// Declared methods, sorted by name.
    pub methods: Vec<MethodDescription>,
}

/// Routes calls by service name to registered modules.
pub struct ServiceRouter {
    modules: BTreeMap<&'static str, Arc<dyn ServiceModule>>,
}

impl ServiceRouter {
    /// Register `modules`; two modules serving the same service is an error.
    pub fn new(modules: Vec<Arc<dyn ServiceModule>>) -> Result<Self> {
        let mut map: BTreeMap<&'static str, Arc<dyn ServiceModule>> = BTreeMap::new();
        for module in modules {
            let name = module.service_name();
            if map.insert(name, module).is_some() {
                return Err(Error::Config(format!("service {name} registered twice")));
            }
        }
        Ok(Self { modules: map })
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }

    /// Scope declarations of every registered module.
    #[must_use]
    pub fn scope_declarations(&self) -> Vec<ScopeDeclaration> {
        self.modules.values().map(|m| m.auth_scopes()).collect()
    }

    /// Services and methods with their scope requirements.
    #[must_use]
    pub fn describe(&self) -> Vec<ServiceDescription> {
        self.modules
            .values()
            .map(|module| {
                let service = module.service_name();
                let methods = module
                    .auth_scopes()
                    .methods
                    .into_iter()
                    .filter_map(|(full, scopes)| {
                        let (svc, name) = split_method(&full)?;
                        (svc == service).then(|| MethodDescription {
                            name: name.to_string(),
                            scopes,
                        })
                    })
                    .collect();
                ServiceDescription {
                    name: service.to_string(),
                    methods,
                }
            })
            .collect()
    }

    fn route<'a>(&'a self, method: &'a str) -> Option<(&'a Arc<dyn ServiceModule>, &'a str)> {
        let (service, short) = split_method(method)?;
        self.modules.get(service).map(|m| (m, short))
    }
}

#[async_trait]
impl Handler for ServiceRouter {
    async fn call(&self, call: Call) -> CallResult {
        let Some((module, method)) = self.route(&call.method) else {
            return Err(Status::unimplemented(format!(
                "unknown method {}",
                call.method
            )));
        };
        module.handle(method, &call).await
    }
}

impl PayloadValidator for ServiceRouter {
    fn validate(&self, method: &str, payload: &Value) -> std::result::Result<(), ValidationError> {
        match self.route(method) {
            Some((module, short)) => module.validate(short, payload),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::rpc::Code;
    use crate::store::InMemoryRecordStore;

    fn router() -> ServiceRouter {
        let store = Arc::new(InMemoryRecordStore::new());
        ServiceRouter::new(vec![
            Arc::new(AuxService::new()),
            Arc::new(RidService::new(store, "zone-a")),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let err = ServiceRouter::new(vec![Arc::new(AuxService::new()), Arc::new(AuxService::new())]);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn unknown_service_is_unimplemented() {
        let err = router()
            .call(Call::new("/nope.Service/Get", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[test]
    fn route_splits_service_and_short_method() {
        let router = router();
        let method = format!("/{}/GetVersion", auxiliary::SERVICE);
        let (module, short) = router.route(&method).unwrap();
        assert_eq!(module.service_name(), auxiliary::SERVICE);
        assert_eq!(short, "GetVersion");

        assert!(router.route("/nope.Service/Get").is_none());
        assert!(router.route("no-slashes").is_none());
    }

    #[test]
    fn describe_lists_services_and_methods() {
        let described = router().describe();
        let names: Vec<&str> = described.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["auxpb.DSSAuxService", "ridpb.DiscoveryAndSynchronizationService"]
        );
        let aux: Vec<&str> = described[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(aux, vec!["GetVersion", "ValidateOauth"]);
    }

    #[test]
    fn declarations_cover_every_module() {
        let decls = router().scope_declarations();
        assert_eq!(decls.len(), 2);
        assert!(decls.iter().all(|d| !d.methods.is_empty()));
    }
}
