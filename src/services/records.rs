//! Generic create/update/get/delete/search handling shared by RID and SCD.
//!
//! Requests carry `id` (UUID), `params` (entity body) and, for writes to an
//! existing entity, `version`. Only the owner of an entity may change or
//! delete it.

use anyhow::anyhow;
use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::rpc::validation::{optional_u64, require_object_field, require_uuid};
use crate::rpc::{Call, CallResult, Status, ValidationError};
use crate::store::{Record, RecordKind, RecordStore, StoreError};

/// Operation on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Create,
    Update,
    Get,
    Delete,
    Search,
}

/// Method names and response field names for one entity type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entity {
    pub kind: RecordKind,
    pub singular: &'static str,
    pub plural: &'static str,
    pub create: &'static str,
    pub update: &'static str,
    pub get: &'static str,
    pub delete: &'static str,
    pub search: &'static str,
    /// Search returns only the caller's own entities.
    pub search_owned_only: bool,
    /// Deletes must name the version being deleted.
    pub delete_requires_version: bool,
}

impl Entity {
    pub fn op(&self, method: &str) -> Option<Op> {
        [
            (self.create, Op::Create),
            (self.update, Op::Update),
            (self.get, Op::Get),
            (self.delete, Op::Delete),
            (self.search, Op::Search),
        ]
        .into_iter()
        .find_map(|(name, op)| (name == method).then_some(op))
    }

    pub fn validate(&self, op: Op, payload: &Value) -> Result<(), ValidationError> {
        match op {
            Op::Create => {
                require_uuid(payload, "id")?;
                require_object_field(payload, "params")?;
            }
            Op::Update => {
                require_uuid(payload, "id")?;
                require_object_field(payload, "params")?;
                if optional_u64(payload, "version")?.is_none() {
                    return Err(ValidationError::new("version", "is required"));
                }
            }
            Op::Get => {
                require_uuid(payload, "id")?;
            }
            Op::Delete => {
                require_uuid(payload, "id")?;
                let version = optional_u64(payload, "version")?;
                if self.delete_requires_version && version.is_none() {
                    return Err(ValidationError::new("version", "is required"));
                }
            }
            Op::Search => {
                if let Some(area) = payload.get("area") {
                    if !area.is_object() && !area.is_string() {
                        return Err(ValidationError::new("area", "must be an object or string"));
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn handle(
        &self,
        op: Op,
        store: &dyn RecordStore,
        locality: &str,
        call: &Call,
    ) -> CallResult {
        let subject = caller(call)?;
        let payload = &call.payload;
        match op {
            Op::Create => {
                let record = Record {
                    kind: self.kind,
                    id: id_of(payload)?,
                    owner: subject.to_string(),
                    writer: locality.to_string(),
                    version: 0,
                    body: payload.get("params").cloned().unwrap_or_else(|| json!({})),
                    updated_at: Utc::now(),
                };
                let stored = store.insert(record).await.map_err(|e| self.store_status(e))?;
                Ok(self.one(&stored))
            }
            Op::Update => {
                let id = id_of(payload)?;
                self.owned(store, &id, subject).await?;
                let record = Record {
                    kind: self.kind,
                    id,
                    owner: subject.to_string(),
                    writer: locality.to_string(),
                    version: 0,
                    body: payload.get("params").cloned().unwrap_or_else(|| json!({})),
                    updated_at: Utc::now(),
                };
                let stored = store
                    .replace(record, version_of(payload)?)
                    .await
                    .map_err(|e| self.store_status(e))?;
                Ok(self.one(&stored))
            }
            Op::Get => {
                let id = id_of(payload)?;
                let record = self.existing(store, &id).await?;
                Ok(self.one(&record))
            }
            Op::Delete => {
                let id = id_of(payload)?;
                self.owned(store, &id, subject).await?;
                let removed = store
                    .remove(self.kind, &id, version_of(payload)?)
                    .await
                    .map_err(|e| self.store_status(e))?;
                Ok(self.one(&removed))
            }
            Op::Search => {
                let records = store.list(self.kind).await.map_err(|e| self.store_status(e))?;
                let rendered: Vec<Value> = records
                    .iter()
                    .filter(|r| !self.search_owned_only || r.owner == subject)
                    .map(render)
                    .collect();
                Ok(keyed(self.plural, Value::Array(rendered)))
            }
        }
    }

    async fn existing(&self, store: &dyn RecordStore, id: &str) -> Result<Record, Status> {
        store
            .get(self.kind, id)
            .await
            .map_err(|e| self.store_status(e))?
            .ok_or_else(|| Status::not_found(format!("{} {id} not found", self.kind.label())))
    }

    async fn owned(&self, store: &dyn RecordStore, id: &str, subject: &str) -> Result<Record, Status> {
        let record = self.existing(store, id).await?;
        if record.owner != subject {
            return Err(Status::permission_denied(format!(
                "{} {id} is owned by another client",
                self.kind.label()
            )));
        }
        Ok(record)
    }

    fn one(&self, record: &Record) -> Value {
        keyed(self.singular, render(record))
    }

    fn store_status(&self, err: StoreError) -> Status {
        let label = self.kind.label();
        match err {
            StoreError::NotFound { id, .. } => Status::not_found(format!("{label} {id} not found")),
            StoreError::AlreadyExists { id, .. } => {
                Status::already_exists(format!("{label} {id} already exists"))
            }
            StoreError::VersionMismatch { expected, actual } => Status::aborted(format!(
                "{label} version mismatch: expected {expected}, current {actual}"
            )),
            StoreError::Backend(_) => Status::internal(err),
        }
    }
}

/// Subject of the verified token; always present once past authorization.
fn caller(call: &Call) -> Result<&str, Status> {
    call.claims
        .as_ref()
        .map(|c| c.subject.as_str())
        .ok_or_else(|| Status::internal(anyhow!("call reached handler without claims")))
}

fn id_of(payload: &Value) -> Result<String, Status> {
    Ok(require_uuid(payload, "id")?.to_string())
}

fn version_of(payload: &Value) -> Result<Option<u64>, Status> {
    Ok(optional_u64(payload, "version")?)
}

fn keyed(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn render(record: &Record) -> Value {
    json!({
        "id": record.id,
        "owner": record.owner,
        "version": record.version,
        "updated_at": record.updated_at.to_rfc3339(),
        "params": record.body,
    })
}
