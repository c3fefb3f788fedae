//! Remote ID discovery and synchronization service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::records::{Entity, Op};
use super::{ServiceModule, full_method};
use crate::auth::ScopeDeclaration;
use crate::rpc::{Call, CallResult, Status, ValidationError};
use crate::store::{RecordKind, RecordStore};

/// Service name.
pub const SERVICE: &str = "ridpb.DiscoveryAndSynchronizationService";

/// Read access to identification service areas and subscriptions.
pub const READ_SCOPE: &str = "dss.read.identification_service_areas";
/// Write access to identification service areas.
pub const WRITE_SCOPE: &str = "dss.write.identification_service_areas";

static ENTITIES: [Entity; 2] = [
    Entity {
        kind: RecordKind::IdentificationServiceArea,
        singular: "service_area",
        plural: "service_areas",
        create: "CreateIdentificationServiceArea",
        update: "UpdateIdentificationServiceArea",
        get: "GetIdentificationServiceArea",
        delete: "DeleteIdentificationServiceArea",
        search: "SearchIdentificationServiceAreas",
        search_owned_only: false,
        delete_requires_version: true,
    },
    Entity {
        kind: RecordKind::RidSubscription,
        singular: "subscription",
        plural: "subscriptions",
        create: "CreateSubscription",
        update: "UpdateSubscription",
        get: "GetSubscription",
        delete: "DeleteSubscription",
        search: "SearchSubscriptions",
        search_owned_only: true,
        delete_requires_version: true,
    },
];

/// RID module over a [`RecordStore`].
pub struct RidService {
    store: Arc<dyn RecordStore>,
    locality: String,
}

impl RidService {
    /// Serve RID entities from `store`, attributing writes to `locality`.
    pub fn new(store: Arc<dyn RecordStore>, locality: impl Into<String>) -> Self {
        Self {
            store,
            locality: locality.into(),
        }
    }

    fn lookup(method: &str) -> Option<(&'static Entity, Op)> {
        ENTITIES
            .iter()
            .find_map(|e| e.op(method).map(|op| (e, op)))
    }
}

#[async_trait]
impl ServiceModule for RidService {
    fn service_name(&self) -> &'static str {
        SERVICE
    }

    fn auth_scopes(&self) -> ScopeDeclaration {
        let [isa, sub] = &ENTITIES;
        let mut decl = ScopeDeclaration::new("rid");
        for method in [isa.create, isa.update, isa.delete] {
            decl = decl.method(full_method(SERVICE, method), [WRITE_SCOPE]);
        }
        for method in [isa.get, isa.search] {
            decl = decl.method(full_method(SERVICE, method), [READ_SCOPE]);
        }
        // Subscriptions only need read access.
        for method in [sub.create, sub.update, sub.get, sub.delete, sub.search] {
            decl = decl.method(full_method(SERVICE, method), [READ_SCOPE]);
        }
        decl
    }

    fn validate(&self, method: &str, payload: &Value) -> Result<(), ValidationError> {
        match Self::lookup(method) {
            Some((entity, op)) => entity.validate(op, payload),
            None => Ok(()),
        }
    }

    async fn handle(&self, method: &str, call: &Call) -> CallResult {
        let (entity, op) = Self::lookup(method)
            .ok_or_else(|| Status::unimplemented(format!("{SERVICE}/{method} is not served")))?;
        entity.handle(op, &*self.store, &self.locality, call).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::auth::{AccessClaims, scope_set};
    use crate::rpc::Code;
    use crate::store::InMemoryRecordStore;

    fn service() -> RidService {
        RidService::new(Arc::new(InMemoryRecordStore::new()), "zone-a")
    }

    #[test]
    fn isa_writes_need_write_scope() {
        let decl = service().auth_scopes();
        assert_eq!(decl.methods.len(), 10);
        assert_eq!(
            decl.methods[&full_method(SERVICE, "CreateIdentificationServiceArea")],
            scope_set([WRITE_SCOPE])
        );
        assert_eq!(
            decl.methods[&full_method(SERVICE, "SearchIdentificationServiceAreas")],
            scope_set([READ_SCOPE])
        );
        assert_eq!(
            decl.methods[&full_method(SERVICE, "DeleteSubscription")],
            scope_set([READ_SCOPE])
        );
    }

    #[tokio::test]
    async fn create_then_get_isa() {
        let svc = service();
        let id = "0f4c6a0e-5b8b-4c43-9d55-7c2e3b1a9f10";
        let mut create = Call::new(
            full_method(SERVICE, "CreateIdentificationServiceArea"),
            json!({"id": id, "params": {"flights_url": "https://uss1.example/flights"}}),
        );
        create.claims = Some(AccessClaims {
            subject: "uss1".into(),
            ..AccessClaims::anonymous()
        });
        let created = svc
            .handle("CreateIdentificationServiceArea", &create)
            .await
            .unwrap();
        assert_eq!(created["service_area"]["id"], id);

        let mut get = create.clone();
        get.payload = json!({"id": id});
        let got = svc.handle("GetIdentificationServiceArea", &get).await.unwrap();
        assert_eq!(
            got["service_area"]["params"]["flights_url"],
            "https://uss1.example/flights"
        );
    }

    #[tokio::test]
    async fn unknown_method_is_unimplemented() {
        let call = Call::new("/x/y", json!({}));
        let err = service().handle("Frobnicate", &call).await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[test]
    fn update_requires_version() {
        let err = service()
            .validate(
                "UpdateSubscription",
                &json!({"id": "0f4c6a0e-5b8b-4c43-9d55-7c2e3b1a9f10", "params": {}}),
            )
            .unwrap_err();
        assert_eq!(err.field, "version");
    }
}
