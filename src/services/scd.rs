//! Strategic conflict detection service. Registered only when enabled.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::records::{Entity, Op};
use super::{ServiceModule, full_method};
use crate::auth::ScopeDeclaration;
use crate::rpc::{Call, CallResult, Status, ValidationError};
use crate::store::{RecordKind, RecordStore};

/// Service name.
pub const SERVICE: &str = "scdpb.UTMAPIUSSDSSAndUSSUSSService";

/// Operation references and subscriptions.
pub const STRATEGIC_COORDINATION_SCOPE: &str = "utm.strategic_coordination";
/// Writing constraint references.
pub const CONSTRAINT_MANAGEMENT_SCOPE: &str = "utm.constraint_management";
/// Reading constraints and subscribing to them.
pub const CONSTRAINT_PROCESSING_SCOPE: &str = "utm.constraint_processing";

static OPERATIONS: Entity = Entity {
    kind: RecordKind::OperationReference,
    singular: "operation_reference",
    plural: "operation_references",
    create: "CreateOperationReference",
    update: "UpdateOperationReference",
    get: "GetOperationReference",
    delete: "DeleteOperationReference",
    search: "SearchOperationReferences",
    search_owned_only: false,
    delete_requires_version: false,
};

static CONSTRAINTS: Entity = Entity {
    kind: RecordKind::ConstraintReference,
    singular: "constraint_reference",
    plural: "constraint_references",
    create: "CreateConstraintReference",
    update: "UpdateConstraintReference",
    get: "GetConstraintReference",
    delete: "DeleteConstraintReference",
    search: "QueryConstraintReferences",
    search_owned_only: false,
    delete_requires_version: false,
};

static SUBSCRIPTIONS: Entity = Entity {
    kind: RecordKind::ScdSubscription,
    singular: "subscription",
    plural: "subscriptions",
    create: "CreateSubscription",
    update: "UpdateSubscription",
    get: "GetSubscription",
    delete: "DeleteSubscription",
    search: "QuerySubscriptions",
    search_owned_only: true,
    delete_requires_version: false,
};

/// SCD module over a [`RecordStore`].
pub struct ScdService {
    store: Arc<dyn RecordStore>,
    locality: String,
}

impl ScdService {
    /// Serve SCD entities from `store`, attributing writes to `locality`.
    pub fn new(store: Arc<dyn RecordStore>, locality: impl Into<String>) -> Self {
        Self {
            store,
            locality: locality.into(),
        }
    }

    fn lookup(method: &str) -> Option<(&'static Entity, Op)> {
        [&OPERATIONS, &CONSTRAINTS, &SUBSCRIPTIONS]
            .into_iter()
            .find_map(|e| e.op(method).map(|op| (e, op)))
    }
}

#[async_trait]
impl ServiceModule for ScdService {
    fn service_name(&self) -> &'static str {
        SERVICE
    }

    fn auth_scopes(&self) -> ScopeDeclaration {
        let ops = &OPERATIONS;
        let cons = &CONSTRAINTS;
        let subs = &SUBSCRIPTIONS;
        let mut decl = ScopeDeclaration::new("scd");

        for method in [ops.create, ops.update, ops.get, ops.delete, ops.search] {
            decl = decl.method(full_method(SERVICE, method), [STRATEGIC_COORDINATION_SCOPE]);
        }
        for method in [cons.create, cons.update, cons.delete] {
            decl = decl.method(full_method(SERVICE, method), [CONSTRAINT_MANAGEMENT_SCOPE]);
        }
        for method in [cons.get, cons.search] {
            decl = decl.method(
                full_method(SERVICE, method),
                [CONSTRAINT_MANAGEMENT_SCOPE, CONSTRAINT_PROCESSING_SCOPE],
            );
        }
        for method in [subs.create, subs.update, subs.get, subs.delete, subs.search] {
            decl = decl.method(
                full_method(SERVICE, method),
                [STRATEGIC_COORDINATION_SCOPE, CONSTRAINT_PROCESSING_SCOPE],
            );
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
