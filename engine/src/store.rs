//! Store - the dirty-tracking record container.
//!
//! The Store holds an ordered collection of records keyed by an identifier
//! field. Every local write tags the record NEW or MODIFIED so a sync
//! coordinator can find what still has to be pushed, and every non-silent
//! mutation is announced to subscribed observers.

use crate::{
    error::Result,
    filter::Query,
    record::{value_kind, DEFAULT_ID_FIELD, STATUS_FIELD},
    snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION},
    Document, Error, Record, RecordId, StoreName, SyncStatus, Version,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Store construction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Name carried by every change event
    pub name: StoreName,
    /// Field holding each record's identifier
    pub id_field: String,
}

impl StoreConfig {
    pub fn new(name: impl Into<StoreName>) -> Self {
        Self {
            name: name.into(),
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }

    pub fn id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }
}

/// Options for [`Store::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Replace the whole collection; saved records are CLEAN unless `status`
    /// says otherwise
    pub reset: bool,
    /// Do not notify observers
    pub silent: bool,
    /// Explicit status for every saved record
    pub status: Option<SyncStatus>,
}

impl SaveOptions {
    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn status(mut self, status: SyncStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Options for [`Store::remove`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Do not notify observers
    pub silent: bool,
    /// Do not queue a remote removal
    pub local_only: bool,
}

impl RemoveOptions {
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }
}

/// One record or many, as accepted by [`Store::save`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveInput(Vec<Value>);

impl SaveInput {
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Value> for SaveInput {
    /// An array saves each element; anything else is a single record.
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => SaveInput(items),
            other => SaveInput(vec![other]),
        }
    }
}

impl From<Vec<Value>> for SaveInput {
    fn from(values: Vec<Value>) -> Self {
        SaveInput(values)
    }
}

impl From<Document> for SaveInput {
    fn from(document: Document) -> Self {
        SaveInput(vec![Value::Object(document)])
    }
}

impl From<Vec<Document>> for SaveInput {
    fn from(documents: Vec<Document>) -> Self {
        SaveInput(documents.into_iter().map(Value::Object).collect())
    }
}

impl From<Record> for SaveInput {
    fn from(record: Record) -> Self {
        SaveInput(vec![Value::Object(record.into_fields())])
    }
}

impl From<&Record> for SaveInput {
    fn from(record: &Record) -> Self {
        SaveInput(vec![Value::Object(record.fields().clone())])
    }
}

impl From<Vec<Record>> for SaveInput {
    fn from(records: Vec<Record>) -> Self {
        SaveInput(
            records
                .into_iter()
                .map(|r| Value::Object(r.into_fields()))
                .collect(),
        )
    }
}

/// Something [`Store::remove`] can resolve to an identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    Id(RecordId),
    Record(Document),
    /// A value that is neither a record nor a usable identifier
    Invalid(Error),
}

/// One identifier or record, or a sequence mixing both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveTarget(Vec<RemoveItem>);

impl From<RecordId> for RemoveTarget {
    fn from(id: RecordId) -> Self {
        RemoveTarget(vec![RemoveItem::Id(id)])
    }
}

impl From<&RecordId> for RemoveTarget {
    fn from(id: &RecordId) -> Self {
        RemoveTarget(vec![RemoveItem::Id(id.clone())])
    }
}

impl From<i64> for RemoveTarget {
    fn from(id: i64) -> Self {
        RecordId::Int(id).into()
    }
}

impl From<i32> for RemoveTarget {
    fn from(id: i32) -> Self {
        RecordId::from(id).into()
    }
}

impl From<&str> for RemoveTarget {
    fn from(id: &str) -> Self {
        RecordId::from(id).into()
    }
}

impl From<&Record> for RemoveTarget {
    fn from(record: &Record) -> Self {
        RemoveTarget(vec![RemoveItem::Record(record.fields().clone())])
    }
}

impl From<Record> for RemoveTarget {
    fn from(record: Record) -> Self {
        RemoveTarget(vec![RemoveItem::Record(record.into_fields())])
    }
}

impl From<Vec<RemoveItem>> for RemoveTarget {
    fn from(items: Vec<RemoveItem>) -> Self {
        RemoveTarget(items)
    }
}

impl From<Vec<RecordId>> for RemoveTarget {
    fn from(ids: Vec<RecordId>) -> Self {
        RemoveTarget(ids.into_iter().map(RemoveItem::Id).collect())
    }
}

impl From<Value> for RemoveTarget {
    /// Arrays are flattened one level; objects are records; anything else is
    /// a bare identifier. Unusable values fail the removal with their own error.
    fn from(value: Value) -> Self {
        fn item(value: Value) -> Option<RemoveItem> {
            match value {
                Value::Null => None,
                Value::Object(map) => Some(RemoveItem::Record(map)),
                other => Some(match RecordId::from_value(&other) {
                    Ok(id) => RemoveItem::Id(id),
                    Err(e) => RemoveItem::Invalid(e),
                }),
            }
        }
        match value {
            Value::Array(items) => RemoveTarget(items.into_iter().filter_map(item).collect()),
            other => RemoveTarget(item(other).into_iter().collect()),
        }
    }
}

impl From<Option<RecordId>> for RemoveTarget {
    fn from(id: Option<RecordId>) -> Self {
        RemoveTarget(id.map(RemoveItem::Id).into_iter().collect())
    }
}

/// What kind of mutation a [`StoreEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Saved,
    Removed,
    Reset,
}

/// Signal emitted by a non-silent store mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    /// Name of the store that changed
    pub store: StoreName,
    pub kind: StoreEventKind,
    /// Identifiers touched by the mutation
    pub ids: Vec<RecordId>,
}

/// Receives store change signals.
///
/// Called synchronously while the store is being mutated, so implementations
/// must not call back into the store.
pub trait StoreObserver: Send + Sync {
    fn on_change(&self, event: &StoreEvent);
}

impl<F> StoreObserver for F
where
    F: Fn(&StoreEvent) + Send + Sync,
{
    fn on_change(&self, event: &StoreEvent) {
        self(event)
    }
}

/// Handle returned by [`Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The main store holding all records.
pub struct Store {
    name: StoreName,
    id_field: String,
    /// Records in insertion order
    records: Vec<Record>,
    /// Position of each identifier in `records`
    index: HashMap<RecordId, usize>,
    /// Identifiers removed locally whose remote copy still has to go
    pending_removals: Vec<RecordId>,
    /// Bumped by every write; stamped on the written record
    revision: Version,
    observers: Vec<(SubscriptionId, Arc<dyn StoreObserver>)>,
    next_subscription: u64,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("id_field", &self.id_field)
            .field("records", &self.records)
            .field("pending_removals", &self.pending_removals)
            .field("revision", &self.revision)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Store {
    /// Create an empty store keyed by `"id"`.
    pub fn new(name: impl Into<StoreName>) -> Self {
        Self::from_config(StoreConfig::new(name))
    }

    /// Create an empty store keyed by `id_field`.
    pub fn with_id_field(name: impl Into<StoreName>, id_field: impl Into<String>) -> Self {
        Self::from_config(StoreConfig::new(name).id_field(id_field))
    }

    pub fn from_config(config: StoreConfig) -> Self {
        Self {
            name: config.name,
            id_field: config.id_field,
            records: Vec::new(),
            index: HashMap::new(),
            pending_removals: Vec::new(),
            revision: 0,
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Save one record or many.
    ///
    /// Unseen identifiers are inserted as NEW, known ones have their whole
    /// field set replaced and become MODIFIED (NEW records stay NEW). Records
    /// without an identifier get a synthesized one. With `options.reset` the
    /// collection is replaced and every record is CLEAN. The batch is validated
    /// up front, so a malformed element leaves the store unchanged.
    ///
    /// Returns the whole collection.
    pub fn save(&mut self, input: impl Into<SaveInput>, options: SaveOptions) -> Result<Vec<Record>> {
        let prepared = input
            .into()
            .into_values()
            .into_iter()
            .map(|value| self.prepare(value))
            .collect::<Result<Vec<_>>>()?;

        let ids: Vec<RecordId> = prepared.iter().map(|p| p.id.clone()).collect();

        let kind = if options.reset {
            self.records.clear();
            self.index.clear();
            self.pending_removals.clear();
            let status = options.status.unwrap_or(SyncStatus::Clean);
            for entry in prepared {
                self.upsert(entry, Some(status));
            }
            StoreEventKind::Reset
        } else {
            for entry in prepared {
                self.upsert(entry, options.status);
            }
            StoreEventKind::Saved
        };

        tracing::debug!(store = %self.name, count = ids.len(), ?kind, "records saved");

        if !options.silent {
            self.notify(kind, ids);
        }

        Ok(self.read(None))
    }

    /// Replace the whole collection with CLEAN records.
    pub fn reset(&mut self, input: impl Into<SaveInput>) -> Result<Vec<Record>> {
        self.save(input, SaveOptions::default().reset())
    }

    /// Copies of the whole collection, or of the record with `id` (zero or one).
    pub fn read(&self, id: Option<&RecordId>) -> Vec<Record> {
        match id {
            None => self.records.clone(),
            Some(id) => self.get(id).cloned().into_iter().collect(),
        }
    }

    /// Borrow a record for read-only inspection.
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.index.contains_key(id)
    }

    /// Iterate over the records in order without copying.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Remove records by identifier or by record.
    ///
    /// Matching records leave the collection at once. Unknown identifiers are
    /// ignored. Records the server already knows about are queued for remote
    /// removal unless `options.local_only`.
    ///
    /// Returns the remaining collection.
    pub fn remove(&mut self, target: impl Into<RemoveTarget>, options: RemoveOptions) -> Result<Vec<Record>> {
        let RemoveTarget(items) = target.into();
        if items.is_empty() {
            return Err(Error::InvalidArgument("nothing to remove".into()));
        }

        let ids = items
            .into_iter()
            .map(|item| self.resolve(item))
            .collect::<Result<HashSet<_>>>()?;

        let mut removed = Vec::new();
        for record in self.records.iter().filter(|r| ids.contains(r.id())) {
            let known_remotely = record.status() != SyncStatus::New && !record.has_provisional_id();
            if known_remotely && !options.local_only && !self.pending_removals.contains(record.id()) {
                self.pending_removals.push(record.id().clone());
            }
            removed.push(record.id().clone());
        }

        if !removed.is_empty() {
            self.records.retain(|r| !ids.contains(r.id()));
            self.rebuild_index();
        }

        tracing::debug!(store = %self.name, count = removed.len(), "records removed");

        if !options.silent && !removed.is_empty() {
            self.notify(StoreEventKind::Removed, removed);
        }

        Ok(self.read(None))
    }

    /// Copies of the records matching `query`, in store order.
    pub fn filter(&self, query: &Query, match_any: bool) -> Vec<Record> {
        crate::filter::filter(&self.records, query, match_any)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Records that still need to be pushed (NEW or MODIFIED), in store order.
    pub fn dirty(&self) -> Vec<Record> {
        self.records
            .iter()
            .filter(|r| r.status().is_dirty())
            .cloned()
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.records.iter().filter(|r| r.status().is_dirty()).count()
    }

    /// Identifiers queued for remote removal.
    pub fn pending_removals(&self) -> &[RecordId] {
        &self.pending_removals
    }

    /// Take the queued remote removals, leaving the queue empty.
    pub fn take_pending_removals(&mut self) -> Vec<RecordId> {
        std::mem::take(&mut self.pending_removals)
    }

    /// Put identifiers (back) on the remote removal queue. Identifiers of
    /// records present in the store are skipped.
    pub fn requeue_removals(&mut self, ids: impl IntoIterator<Item = RecordId>) {
        for id in ids {
            if !self.index.contains_key(&id) && !self.pending_removals.contains(&id) {
                self.pending_removals.push(id);
            }
        }
    }

    /// Move a record to the identifier the server assigned it, keeping its
    /// position. Fails if `to` is already taken by another record.
    pub fn reassign_id(&mut self, from: &RecordId, to: RecordId) -> Result<()> {
        if from == &to {
            return Ok(());
        }
        if self.index.contains_key(&to) {
            return Err(Error::InvalidArgument(format!(
                "identifier {} is already in use",
                to
            )));
        }
        let pos = self
            .index
            .remove(from)
            .ok_or_else(|| Error::InvalidArgument(format!("no record with identifier {}", from)))?;
        self.revision += 1;
        let record = &mut self.records[pos];
        record.set_id(to.clone(), &self.id_field);
        record.set_version(self.revision);
        self.index.insert(to, pos);
        Ok(())
    }

    /// Register an observer for change signals.
    pub fn subscribe(&mut self, observer: Arc<dyn StoreObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, observer));
        id
    }

    /// Drop an observer. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    /// Export the current store state as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        StoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            name: self.name.clone(),
            id_field: self.id_field.clone(),
            revision: self.revision,
            records: self.records.clone(),
            pending_removals: self.pending_removals.clone(),
        }
    }

    /// Import state from a snapshot.
    ///
    /// This replaces records and queued removals. Observers are kept and are
    /// not notified.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate()?;

        if snapshot.name != self.name {
            return Err(Error::InvalidSnapshot(format!(
                "store name mismatch: expected '{}', got '{}'",
                self.name, snapshot.name
            )));
        }
        if snapshot.id_field != self.id_field {
            return Err(Error::InvalidSnapshot(format!(
                "identifier field mismatch: expected '{}', got '{}'",
                self.id_field, snapshot.id_field
            )));
        }

        let max_version = snapshot.records.iter().map(Record::version).max().unwrap_or(0);
        self.revision = snapshot.revision.max(max_version);
        self.records = snapshot.records;
        self.pending_removals = snapshot.pending_removals;
        self.rebuild_index();

        Ok(())
    }

    /// Get snapshot metadata without full export.
    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            format_version: SNAPSHOT_FORMAT_VERSION,
            name: self.name.clone(),
            record_count: self.records.len(),
            dirty_count: self.dirty_count(),
            pending_removal_count: self.pending_removals.len(),
        }
    }

    fn prepare(&self, value: Value) -> Result<Prepared> {
        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidRecord(format!(
                    "expected an object, got {}",
                    value_kind(&other)
                )))
            }
        };

        if fields.contains_key(STATUS_FIELD) {
            return Err(Error::InvalidArgument(format!(
                "field '{}' is reserved",
                STATUS_FIELD
            )));
        }

        match fields.get(&self.id_field) {
            Some(value) if !value.is_null() => Ok(Prepared {
                id: RecordId::from_value(value)?,
                fields,
                provisional: false,
            }),
            _ => {
                let id = RecordId::Str(uuid::Uuid::new_v4().to_string());
                fields.insert(self.id_field.clone(), id.to_value());
                Ok(Prepared {
                    id,
                    fields,
                    provisional: true,
                })
            }
        }
    }

    fn upsert(&mut self, entry: Prepared, status: Option<SyncStatus>) {
        self.revision += 1;
        let version = self.revision;
        match self.index.get(&entry.id) {
            Some(&pos) => {
                let record = &mut self.records[pos];
                let next = status.unwrap_or_else(|| record.status().after_local_write());
                record.replace_fields(entry.fields);
                record.set_status(next);
                record.set_version(version);
            }
            None => {
                // Re-created before its removal went out: the remote copy
                // still exists, so the record must be pushed as an update
                let queued = self.pending_removals.iter().position(|id| *id == entry.id);
                if let Some(pos) = queued {
                    self.pending_removals.remove(pos);
                }
                let fallback = if queued.is_some() {
                    SyncStatus::Modified
                } else {
                    SyncStatus::New
                };
                let status = status.unwrap_or(fallback);
                let record = Record::new(entry.id.clone(), entry.fields, status)
                    .with_provisional_id(entry.provisional && status == SyncStatus::New)
                    .with_version(version);
                self.index.insert(entry.id, self.records.len());
                self.records.push(record);
            }
        }
    }

    fn resolve(&self, item: RemoveItem) -> Result<RecordId> {
        match item {
            RemoveItem::Id(id) => Ok(id),
            RemoveItem::Invalid(e) => Err(e),
            RemoveItem::Record(fields) => match fields.get(&self.id_field) {
                Some(value) => RecordId::from_value(value),
                None => Err(Error::InvalidArgument(format!(
                    "record has no '{}' field",
                    self.id_field
                ))),
            },
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id().clone(), pos))
            .collect();
    }

    fn notify(&self, kind: StoreEventKind, ids: Vec<RecordId>) {
        if self.observers.is_empty() {
            return;
        }
        let event = StoreEvent {
            store: self.name.clone(),
            kind,
            ids,
        };
        for (_, observer) in &self.observers {
            observer.on_change(&event);
        }
    }
}

/// A validated record waiting to be written.
struct Prepared {
    id: RecordId,
    fields: Document,
    provisional: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn seeded() -> Store {
        let mut store = Store::new("users");
        store
            .reset(json!([
                {"id": 1, "fname": "John", "dept": "Accounting"},
                {"id": 2, "fname": "Jane", "dept": "IT"},
                {"id": 3, "fname": "John", "dept": "Marketing"}
            ]))
            .unwrap();
        store
    }

    fn status_of(store: &Store, id: i64) -> SyncStatus {
        store.get(&RecordId::Int(id)).unwrap().status()
    }

    #[test]
    fn create_store() {
        let store = Store::new("users");
        assert_eq!(store.name(), "users");
        assert_eq!(store.id_field(), "id");
        assert!(store.is_empty());

        let store = Store::with_id_field("tasks", "taskId");
        assert_eq!(store.id_field(), "taskId");
    }

    #[test]
    fn save_new_record() {
        let mut store = Store::new("users");
        let all = store
            .save(json!({"id": 1, "fname": "John"}), SaveOptions::default())
            .unwrap();

        assert_eq!(all.len(), 1);
        assert_eq!(status_of(&store, 1), SyncStatus::New);
        assert_eq!(all[0]["fname"], json!("John"));
    }

    #[test]
    fn save_replaces_whole_field_set() {
        let mut store = seeded();
        store
            .save(json!({"id": 1, "fname": "Johnny"}), SaveOptions::default())
            .unwrap();

        let record = store.get(&RecordId::Int(1)).unwrap();
        assert_eq!(record["fname"], json!("Johnny"));
        // No shallow merge: dept is gone
        assert!(record.get("dept").is_none());
        assert_eq!(record.status(), SyncStatus::Modified);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn new_record_stays_new_on_update() {
        let mut store = Store::new("users");
        store.save(json!({"id": 9}), SaveOptions::default()).unwrap();
        store
            .save(json!({"id": 9, "fname": "x"}), SaveOptions::default())
            .unwrap();
        assert_eq!(status_of(&store, 9), SyncStatus::New);
    }

    #[test]
    fn modified_never_goes_back_to_new() {
        let mut store = seeded();
        store.save(json!({"id": 2}), SaveOptions::default()).unwrap();
        store.save(json!({"id": 2}), SaveOptions::default()).unwrap();
        assert_eq!(status_of(&store, 2), SyncStatus::Modified);
    }

    #[test]
    fn reset_marks_everything_clean() {
        let mut store = seeded();
        store.save(json!({"id": 7}), SaveOptions::default()).unwrap();
        store.remove(1, RemoveOptions::default()).unwrap();
        assert_eq!(store.pending_removals(), &[RecordId::Int(1)]);

        store
            .reset(json!([{"id": 1}, {"id": 2}]))
            .unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.iter().all(|r| r.status() == SyncStatus::Clean));
        assert!(store.pending_removals().is_empty());
        assert!(store.get(&RecordId::Int(7)).is_none());
    }

    #[test]
    fn reset_with_explicit_status() {
        let mut store = Store::new("users");
        store
            .save(
                json!([{"id": 1}, {"id": 2}]),
                SaveOptions::default().reset().status(SyncStatus::New),
            )
            .unwrap();
        assert_eq!(store.dirty_count(), 2);
    }

    #[test]
    fn save_synthesizes_missing_identifier() {
        let mut store = Store::new("users");
        store
            .save(json!({"fname": "Anon"}), SaveOptions::default())
            .unwrap();

        let record = &store.read(None)[0];
        assert!(record.has_provisional_id());
        assert!(matches!(record.id(), RecordId::Str(s) if !s.is_empty()));
        assert_eq!(record["id"], record.id().to_value());

        // Re-saving the copy keeps the identifier provisional while NEW
        let mut copy = record.clone();
        copy.set("fname", "Named");
        store.save(&copy, SaveOptions::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(copy.id()).unwrap().has_provisional_id());
    }

    #[test]
    fn save_rejects_malformed_batch_atomically() {
        let mut store = seeded();
        let result = store.save(
            json!([{"id": 10}, "not a record"]),
            SaveOptions::default(),
        );
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
        assert_eq!(store.len(), 3);

        let result = store.save(json!({"id": 1.5}), SaveOptions::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        let result = store.save(
            json!({"id": 11, "_syncStatus": 0}),
            SaveOptions::default(),
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn read_returns_copies() {
        let store = seeded();
        let mut copies = store.read(None);
        copies[0].set("fname", "Mutated");
        assert_eq!(store.get(&RecordId::Int(1)).unwrap()["fname"], json!("John"));

        assert_eq!(store.read(Some(&RecordId::Int(2))).len(), 1);
        assert!(store.read(Some(&RecordId::Int(99))).is_empty());
    }

    #[test]
    fn remove_by_id_record_and_mixed() {
        let mut store = seeded();
        store.save(json!({"id": 4}), SaveOptions::default()).unwrap();

        let remaining = store.remove(4, RemoveOptions::default()).unwrap();
        assert_eq!(remaining.len(), 3);
        // NEW records never reached the server
        assert!(store.pending_removals().is_empty());

        let record = store.read(Some(&RecordId::Int(1))).remove(0);
        store
            .remove(
                vec![RemoveItem::Id(RecordId::Int(2)), RemoveItem::Record(record.into_fields())],
                RemoveOptions::default(),
            )
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.pending_removals(),
            &[RecordId::Int(1), RecordId::Int(2)]
        );
        // Index still resolves the survivor
        assert!(store.get(&RecordId::Int(3)).is_some());
    }

    #[test]
    fn remove_from_json_value() {
        let mut store = seeded();
        store
            .remove(json!([1, {"id": 3}]), RemoveOptions::default())
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_local_only_does_not_queue() {
        let mut store = seeded();
        store
            .remove(1, RemoveOptions::default().local_only())
            .unwrap();
        assert!(store.pending_removals().is_empty());
    }

    #[test]
    fn remove_nothing_is_invalid() {
        let mut store = seeded();
        assert!(matches!(
            store.remove(Value::Null, RemoveOptions::default()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.remove(Vec::<RecordId>::new(), RemoveOptions::default()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.remove(json!({"fname": "John"}), RemoveOptions::default()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.remove(json!(true), RemoveOptions::default()),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn remove_unknown_is_ignored() {
        let mut store = seeded();
        let remaining = store.remove(99, RemoveOptions::default()).unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[test]
    fn resave_after_remove_cancels_queued_removal() {
        let mut store = seeded();
        store.remove(1, RemoveOptions::default()).unwrap();
        assert_eq!(store.pending_removals(), &[RecordId::Int(1)]);

        store
            .save(json!({"id": 1, "fname": "Recreated"}), SaveOptions::default())
            .unwrap();

        assert!(store.pending_removals().is_empty());
        // Still known remotely, so it goes out as an update
        assert_eq!(status_of(&store, 1), SyncStatus::Modified);
        assert!(!store.get(&RecordId::Int(1)).unwrap().has_provisional_id());
    }

    #[test]
    fn requeue_skips_records_present_locally() {
        let mut store = seeded();
        store.requeue_removals([RecordId::Int(1), RecordId::Int(99)]);
        assert_eq!(store.pending_removals(), &[RecordId::Int(99)]);
    }

    #[test]
    fn filter_does_not_mutate() {
        let store = seeded();
        let before = store.read(None);
        let matched = store.filter(&Query::new().field("fname", "John"), false);
        assert_eq!(matched.len(), 2);
        assert_eq!(store.read(None), before);
    }

    #[test]
    fn observers_receive_signals() {
        let mut store = seeded();
        let events: Arc<Mutex<Vec<StoreEvent>>> = Arc::default();
        let sink = events.clone();
        let sub = store.subscribe(Arc::new(move |event: &StoreEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        store.save(json!({"id": 5}), SaveOptions::default()).unwrap();
        store
            .save(json!({"id": 6}), SaveOptions::default().silent())
            .unwrap();
        store.remove(5, RemoveOptions::default()).unwrap();
        store.reset(json!([])).unwrap();

        {
            let events = events.lock().unwrap();
            assert_eq!(events.len(), 3);
            assert_eq!(events[0].store, "users");
            assert_eq!(events[0].kind, StoreEventKind::Saved);
            assert_eq!(events[0].ids, vec![RecordId::Int(5)]);
            assert_eq!(events[1].kind, StoreEventKind::Removed);
            assert_eq!(events[2].kind, StoreEventKind::Reset);
        }

        assert!(store.unsubscribe(sub));
        store.save(json!({"id": 8}), SaveOptions::default()).unwrap();
        assert_eq!(events.lock().unwrap().len(), 3);
    }

    #[test]
    fn versions_increase_with_every_write() {
        let mut store = seeded();
        let before = store.get(&RecordId::Int(1)).unwrap().version();
        store.save(json!({"id": 1}), SaveOptions::default()).unwrap();
        let after = store.get(&RecordId::Int(1)).unwrap().version();
        assert!(after > before);
    }

    #[test]
    fn reassign_id_keeps_position() {
        let mut store = Store::new("users");
        store
            .save(json!([{"fname": "a"}, {"id": 2}]), SaveOptions::default())
            .unwrap();
        let provisional = store.read(None)[0].id().clone();

        store.reassign_id(&provisional, RecordId::Int(100)).unwrap();

        let all = store.read(None);
        assert_eq!(all[0].id(), &RecordId::Int(100));
        assert_eq!(all[0]["id"], json!(100));
        assert!(!all[0].has_provisional_id());
        assert!(store.get(&provisional).is_none());

        assert!(matches!(
            store.reassign_id(&RecordId::Int(100), RecordId::Int(2)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn custom_identifier_field() {
        let mut store = Store::with_id_field("tasks", "taskId");
        store
            .save(json!({"taskId": "t-1", "id": 5}), SaveOptions::default())
            .unwrap();
        assert!(store.get(&RecordId::from("t-1")).is_some());
        store
            .remove(json!({"taskId": "t-1"}), RemoveOptions::default())
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn export_import_roundtrip() {
        let mut store = seeded();
        store.save(json!({"id": 4}), SaveOptions::default()).unwrap();
        store.remove(2, RemoveOptions::default()).unwrap();

        let snapshot = store.export_state();
        let mut restored = Store::new("users");
        restored.import_state(snapshot).unwrap();

        assert_eq!(restored.read(None), store.read(None));
        assert_eq!(restored.pending_removals(), store.pending_removals());
        assert_eq!(status_of(&restored, 4), SyncStatus::New);

        // Later writes keep counting from the imported revision
        let before = restored.get(&RecordId::Int(4)).unwrap().version();
        restored.save(json!({"id": 1}), SaveOptions::default()).unwrap();
        assert!(restored.get(&RecordId::Int(1)).unwrap().version() > before);
    }

    #[test]
    fn import_name_mismatch() {
        let snapshot = seeded().export_state();
        let mut other = Store::new("tasks");
        assert!(matches!(
            other.import_state(snapshot),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn snapshot_metadata() {
        let mut store = seeded();
        store.save(json!({"id": 9}), SaveOptions::default()).unwrap();
        store.remove(1, RemoveOptions::default()).unwrap();

        let metadata = store.snapshot_metadata();
        assert_eq!(metadata.name, "users");
        assert_eq!(metadata.record_count, 3);
        assert_eq!(metadata.dirty_count, 1);
        assert_eq!(metadata.pending_removal_count, 1);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_distinct_saves_are_all_new(ids in proptest::collection::hash_set(0i64..10_000, 0..40)) {
                let mut store = Store::new("users");
                for id in &ids {
                    store.save(json!({"id": id}), SaveOptions::default()).unwrap();
                }
                prop_assert_eq!(store.len(), ids.len());
                prop_assert!(store.iter().all(|r| r.status() == SyncStatus::New));
            }

            #[test]
            fn prop_resave_keeps_count_and_never_returns_to_new(
                seed in proptest::collection::hash_set(0i64..500, 1..20),
                clean in any::<bool>(),
                pick in any::<proptest::sample::Index>(),
            ) {
                let seed: Vec<i64> = seed.into_iter().collect();
                let mut store = Store::new("users");
                let docs: Vec<Value> = seed.iter().map(|id| json!({"id": id})).collect();
                let options = if clean {
                    SaveOptions::default().reset()
                } else {
                    SaveOptions::default()
                };
                store.save(docs, options).unwrap();

                let id = seed[pick.index(seed.len())];
                let before = status_of(&store, id);
                store.save(json!({"id": id, "touched": true}), SaveOptions::default()).unwrap();
                let after = status_of(&store, id);

                prop_assert_eq!(store.len(), seed.len());
                match before {
                    SyncStatus::New => prop_assert_eq!(after, SyncStatus::New),
                    _ => prop_assert_eq!(after, SyncStatus::Modified),
                }
            }

            #[test]
            fn prop_remove_drops_exactly_one(
                seed in proptest::collection::hash_set(0i64..500, 1..20),
                pick in any::<proptest::sample::Index>(),
            ) {
                let seed: Vec<i64> = seed.into_iter().collect();
                let mut store = Store::new("users");
                store.reset(seed.iter().map(|id| json!({"id": id})).collect::<Vec<_>>()).unwrap();

                let id = seed[pick.index(seed.len())];
                let before = store.read(None).len();
                store.remove(id, RemoveOptions::default()).unwrap();

                prop_assert!(store.read(Some(&RecordId::Int(id))).is_empty());
                prop_assert_eq!(store.read(None).len(), before - 1);
            }

            #[test]
            fn prop_filter_is_idempotent(
                seed in proptest::collection::vec((0i64..3, 0i64..3), 0..20),
                fname in 0i64..3,
                match_any in any::<bool>(),
            ) {
                let mut store = Store::new("users");
                let docs: Vec<Value> = seed
                    .iter()
                    .enumerate()
                    .map(|(i, (f, d))| json!({"id": i as i64, "fname": f, "dept": d}))
                    .collect();
                store.reset(docs).unwrap();

                let query = Query::new().field("fname", fname).field("dept", 1);
                let first = store.filter(&query, match_any);
                let second = store.filter(&query, match_any);
                prop_assert_eq!(first, second);
            }
        }
    }
}
