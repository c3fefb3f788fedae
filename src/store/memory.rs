//! In-memory [`RecordStore`] backed by `DashMap`.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{Record, RecordKind, RecordStore, StoreError};

/// Process-local record store. Not shared across nodes.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: DashMap<(RecordKind, String), Record>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn check_version(expected: Option<u64>, actual: u64) -> Result<(), StoreError> {
    match expected {
        Some(expected) if expected != actual => {
            Err(StoreError::VersionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, mut record: Record) -> Result<Record, StoreError> {
        match self.records.entry((record.kind, record.id.clone())) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                kind: record.kind,
                id: record.id,
            }),
            Entry::Vacant(slot) => {
                record.version = 1;
                record.updated_at = Utc::now();
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn replace(
        &self,
        mut record: Record,
        expected_version: Option<u64>,
    ) -> Result<Record, StoreError> {
        let Some(mut existing) = self.records.get_mut(&(record.kind, record.id.clone())) else {
            return Err(StoreError::NotFound {
                kind: record.kind,
                id: record.id,
            });
        };
        check_version(expected_version, existing.version)?;
        record.version = existing.version + 1;
        record.updated_at = Utc::now();
        *existing = record.clone();
        Ok(record)
    }

    async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .records
            .get(&(kind, id.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn remove(
        &self,
        kind: RecordKind,
        id: &str,
        expected_version: Option<u64>,
    ) -> Result<Record, StoreError> {
        let key = (kind, id.to_string());
        match self.records.entry(key) {
            Entry::Vacant(_) => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
            Entry::Occupied(entry) => {
                check_version(expected_version, entry.get().version)?;
                Ok(entry.remove())
            }
        }
    }

    async fn list(&self, kind: RecordKind) -> Result<Vec<Record>, StoreError> {
        let mut records: Vec<Record> = self
            .records
            .iter()
            .filter(|r| r.key().0 == kind)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(id: &str) -> Record {
        Record {
            kind: RecordKind::IdentificationServiceArea,
            id: id.to_string(),
            owner: "uss1".to_string(),
            writer: "zone-a".to_string(),
            version: 0,
            body: json!({"extents": {}}),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_duplicate_fails() {
        let store = InMemoryRecordStore::new();
        let stored = store.insert(record("a")).await.unwrap();
        assert_eq!(stored.version, 1);

        let err = store.insert(record("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn replace_checks_version() {
        let store = InMemoryRecordStore::new();
        store.insert(record("a")).await.unwrap();

        let err = store.replace(record("a"), Some(7)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { expected: 7, actual: 1 }));

        let updated = store.replace(record("a"), Some(1)).await.unwrap();
        assert_eq!(updated.version, 2);
        assert!(matches!(
            store.replace(record("missing"), None).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn remove_and_list() {
        let store = InMemoryRecordStore::new();
        store.insert(record("b")).await.unwrap();
        store.insert(record("a")).await.unwrap();

        let ids: Vec<String> = store
            .list(RecordKind::IdentificationServiceArea)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.list(RecordKind::RidSubscription).await.unwrap().is_empty());

        store
            .remove(RecordKind::IdentificationServiceArea, "a", None)
            .await
            .unwrap();
        assert!(
            store
                .get(RecordKind::IdentificationServiceArea, "a")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.len(), 1);
    }
}
