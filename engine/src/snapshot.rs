//! Snapshot types for persisting and restoring store state.
//!
//! A snapshot holds everything needed to bring a store back after a restart:
//! records in order with their statuses, and the queue of removals that have
//! not reached the server yet.

use crate::{
    error::Result, record::STATUS_FIELD, Error, Record, RecordId, StoreName, SyncStatus, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Name of the store the snapshot was taken from
    pub name: StoreName,
    /// Identifier field of that store
    pub id_field: String,
    /// Store revision counter at snapshot time
    pub revision: Version,
    /// All records in store order
    pub records: Vec<Record>,
    /// Removals still to be pushed to the server
    #[serde(default)]
    pub pending_removals: Vec<RecordId>,
}

impl StoreSnapshot {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Count records that still need to be pushed.
    pub fn dirty_count(&self) -> usize {
        self.records.iter().filter(|r| r.status().is_dirty()).count()
    }

    /// Check internal consistency: unique identifiers that agree with each
    /// record's identifier field, no reserved field in caller data, and
    /// provisional identifiers only on NEW records.
    pub fn validate(&self) -> Result<()> {
        if self.id_field.is_empty() {
            return Err(Error::InvalidSnapshot("empty identifier field".into()));
        }

        let mut seen = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            if !seen.insert(record.id()) {
                return Err(Error::InvalidSnapshot(format!(
                    "duplicate identifier {}",
                    record.id()
                )));
            }

            let stored = record
                .get(&self.id_field)
                .map(RecordId::from_value)
                .transpose()
                .map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
            if stored.as_ref() != Some(record.id()) {
                return Err(Error::InvalidSnapshot(format!(
                    "record {} does not carry its identifier in '{}'",
                    record.id(),
                    self.id_field
                )));
            }

            if record.get(STATUS_FIELD).is_some() {
                return Err(Error::InvalidSnapshot(format!(
                    "record {} uses reserved field '{}'",
                    record.id(),
                    STATUS_FIELD
                )));
            }

            if record.has_provisional_id() && record.status() != SyncStatus::New {
                return Err(Error::InvalidSnapshot(format!(
                    "record {} has a provisional identifier but is not new",
                    record.id()
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub name: StoreName,
    pub record_count: usize,
    /// Records tagged NEW or MODIFIED
    pub dirty_count: usize,
    pub pending_removal_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            name: snapshot.name.clone(),
            record_count: snapshot.record_count(),
            dirty_count: snapshot.dirty_count(),
            pending_removal_count: snapshot.pending_removals.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Document;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn snapshot(records: Vec<Record>) -> StoreSnapshot {
        StoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            name: "users".into(),
            id_field: "id".into(),
            revision: records.len() as Version,
            records,
            pending_removals: vec![RecordId::Int(9)],
        }
    }

    #[test]
    fn json_roundtrip() {
        let original = snapshot(vec![
            Record::new(1, doc(json!({"id": 1, "fname": "John"})), SyncStatus::Clean),
            Record::new(2, doc(json!({"id": 2, "tags": [111]})), SyncStatus::Modified),
        ]);

        let json = original.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();

        assert_eq!(original, restored);
        assert!(json.contains("\"pendingRemovals\":[9]"));
    }

    #[test]
    fn record_order_is_preserved() {
        let original = snapshot(vec![
            Record::new(3, doc(json!({"id": 3})), SyncStatus::Clean),
            Record::new(1, doc(json!({"id": 1})), SyncStatus::Clean),
        ]);
        let restored = StoreSnapshot::from_json(&original.to_json_pretty().unwrap()).unwrap();
        let ids: Vec<_> = restored.records.iter().map(|r| r.id().clone()).collect();
        assert_eq!(ids, vec![RecordId::Int(3), RecordId::Int(1)]);
    }

    #[test]
    fn validate_success() {
        let snap = snapshot(vec![
            Record::new(1, doc(json!({"id": 1})), SyncStatus::Clean),
            Record::new("tmp", doc(json!({"id": "tmp"})), SyncStatus::New)
                .with_provisional_id(true),
        ]);
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn validate_duplicate_identifier() {
        let snap = snapshot(vec![
            Record::new(1, doc(json!({"id": 1})), SyncStatus::Clean),
            Record::new(1, doc(json!({"id": 1})), SyncStatus::New),
        ]);
        assert!(matches!(snap.validate(), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn validate_identifier_field_mismatch() {
        let snap = snapshot(vec![Record::new(
            1,
            doc(json!({"id": 2})),
            SyncStatus::Clean,
        )]);
        assert!(matches!(snap.validate(), Err(Error::InvalidSnapshot(_))));

        let snap = snapshot(vec![Record::new(1, doc(json!({})), SyncStatus::Clean)]);
        assert!(matches!(snap.validate(), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn validate_reserved_field() {
        let snap = snapshot(vec![Record::new(
            1,
            doc(json!({"id": 1, "_syncStatus": 0})),
            SyncStatus::Clean,
        )]);
        assert!(matches!(snap.validate(), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn validate_provisional_must_be_new() {
        let snap = snapshot(vec![Record::new(
            "tmp",
            doc(json!({"id": "tmp"})),
            SyncStatus::Modified,
        )
        .with_provisional_id(true)]);
        assert!(matches!(snap.validate(), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn snapshot_metadata() {
        let snap = snapshot(vec![
            Record::new(1, doc(json!({"id": 1})), SyncStatus::Clean),
            Record::new(2, doc(json!({"id": 2})), SyncStatus::New),
        ]);
        let metadata: SnapshotMetadata = (&snap).into();

        assert_eq!(metadata.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(metadata.name, "users");
        assert_eq!(metadata.record_count, 2);
        assert_eq!(metadata.dirty_count, 1);
        assert_eq!(metadata.pending_removal_count, 1);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "name": "users",
            "idField": "id",
            "revision": 0,
            "records": []
        }"#;

        let result = StoreSnapshot::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn reject_malformed_json() {
        assert!(matches!(
            StoreSnapshot::from_json("{not json"),
            Err(Error::InvalidSnapshot(_))
        ));
    }
}
