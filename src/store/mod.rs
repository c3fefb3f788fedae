//! Record storage seam used by the service modules.
//!
//! The durable, federated store lives outside this crate; modules only see the
//! [`RecordStore`] trait. [`InMemoryRecordStore`] backs tests and single-node
//! local runs.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::InMemoryRecordStore;

/// Kinds of records kept by the RID and SCD modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// RID identification service area
    IdentificationServiceArea,
    /// RID subscription
    RidSubscription,
    /// SCD operation reference
    OperationReference,
    /// SCD constraint reference
    ConstraintReference,
    /// SCD subscription
    ScdSubscription,
}

impl RecordKind {
    /// Human-readable entity name for error messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::IdentificationServiceArea => "identification service area",
            Self::RidSubscription | Self::ScdSubscription => "subscription",
            Self::OperationReference => "operation reference",
            Self::ConstraintReference => "constraint reference",
        }
    }
}

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Entity kind.
    pub kind: RecordKind,
    /// Entity id (UUID string).
    pub id: String,
    /// Subject of the token that created it.
    pub owner: String,
    /// Locality of the node that last wrote it.
    pub writer: String,
    /// Monotonic version, starting at 1.
    pub version: u64,
    /// Entity body as submitted.
    pub body: Value,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No such record.
    #[error("{kind:?} {id} not found")]
    NotFound {
        /// Kind.
        kind: RecordKind,
        /// Id.
        id: String,
    },

    /// Record already exists.
    #[error("{kind:?} {id} already exists")]
    AlreadyExists {
        /// Kind.
        kind: RecordKind,
        /// Id.
        id: String,
    },

    /// Optimistic concurrency check failed.
    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch {
        /// Version supplied by the caller.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Keyed record storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record at version 1.
    async fn insert(&self, record: Record) -> Result<Record, StoreError>;

    /// Replace an existing record, bumping its version.
    ///
    /// When `expected_version` is set it must match the stored version.
    async fn replace(
        &self,
        record: Record,
        expected_version: Option<u64>,
    ) -> Result<Record, StoreError>;

    /// Fetch a record.
    async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>, StoreError>;

    /// Remove a record, returning it.
    async fn remove(
        &self,
        kind: RecordKind,
        id: &str,
        expected_version: Option<u64>,
    ) -> Result<Record, StoreError>;

    /// All records of one kind, sorted by id.
    async fn list(&self, kind: RecordKind) -> Result<Vec<Record>, StoreError>;
}
