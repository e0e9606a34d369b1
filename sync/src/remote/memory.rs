//! In-process remote channel.
//!
//! Behaves like a small REST collection held in a `DashMap`. Used by tests and
//! offline demos; supports server-assigned identifiers, per-record fault
//! injection and a gate that holds saves in flight.

use super::{RemoteChannel, SaveKind, SaveRequest};
use crate::error::RemoteError;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tidepool_engine::{Document, Query, Record, RecordId, SyncStatus, DEFAULT_ID_FIELD};
use tokio::sync::watch;

/// Number of calls served, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub reads: usize,
    pub creates: usize,
    pub updates: usize,
    pub removes: usize,
}

/// Remote channel backed by process memory.
#[derive(Debug)]
pub struct MemoryChannel {
    id_field: String,
    documents: DashMap<RecordId, Document>,
    /// Creates always get a fresh integer identifier
    assign_ids: bool,
    next_id: AtomicI64,
    failing_saves: DashSet<RecordId>,
    failing_removes: DashSet<RecordId>,
    failing_reads: AtomicBool,
    gate: watch::Sender<bool>,
    waiting: AtomicUsize,
    reads: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    removes: AtomicUsize,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// Create an empty channel keyed by `"id"`. Creates keep the identifier
    /// they were sent with, or get a fresh one when they carry none.
    pub fn new() -> Self {
        Self::with_id_field(DEFAULT_ID_FIELD)
    }

    pub fn with_id_field(id_field: impl Into<String>) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            id_field: id_field.into(),
            documents: DashMap::new(),
            assign_ids: false,
            next_id: AtomicI64::new(1),
            failing_saves: DashSet::new(),
            failing_removes: DashSet::new(),
            failing_reads: AtomicBool::new(false),
            gate,
            waiting: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        }
    }

    /// Assign every created record a fresh integer identifier starting at
    /// `first`, whatever identifier the client sent.
    pub fn assigning_ids(mut self, first: i64) -> Self {
        self.assign_ids = true;
        self.next_id = AtomicI64::new(first);
        self
    }

    /// Insert documents directly, as if they already existed remotely.
    pub fn seed(&self, documents: impl IntoIterator<Item = Value>) {
        for document in documents {
            if let Value::Object(map) = document {
                if let Some(id) = map.get(&self.id_field).and_then(|v| RecordId::from_value(v).ok()) {
                    self.documents.insert(id, map);
                }
            }
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<Document> {
        self.documents.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.documents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Reject saves of the record with this local identifier.
    pub fn fail_saves_for(&self, id: impl Into<RecordId>) {
        self.failing_saves.insert(id.into());
    }

    /// Reject removals of this identifier.
    pub fn fail_removes_for(&self, id: impl Into<RecordId>) {
        self.failing_removes.insert(id.into());
    }

    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    /// Clear all injected faults.
    pub fn heal(&self) {
        self.failing_saves.clear();
        self.failing_removes.clear();
        self.failing_reads.store(false, Ordering::SeqCst);
    }

    /// Hold every save until [`MemoryChannel::release`] is called.
    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    /// Saves currently waiting at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            reads: self.reads.load(Ordering::SeqCst),
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            removes: self.removes.load(Ordering::SeqCst),
        }
    }

    async fn pass_gate(&self) {
        let mut gate = self.gate.subscribe();
        if !*gate.borrow() {
            return;
        }
        self.waiting.fetch_add(1, Ordering::SeqCst);
        // The sender lives as long as self, so this only ends on release
        let _ = gate.wait_for(|held| !*held).await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }

    fn fresh_id(&self) -> RecordId {
        RecordId::Int(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl RemoteChannel for MemoryChannel {
    async fn read(&self, query: Option<&Document>) -> Result<Vec<Document>, RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                body: "read unavailable".into(),
            });
        }

        let query = query.cloned().map(Query::from_document).unwrap_or_default();
        let mut matched: Vec<(RecordId, Document)> = self
            .documents
            .iter()
            .filter(|entry| {
                let record = Record::new(entry.key().clone(), entry.value().clone(), SyncStatus::Clean);
                query.matches(&record, false)
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(matched.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn save(&self, request: SaveRequest) -> Result<Document, RemoteError> {
        self.pass_gate().await;

        if self.failing_saves.contains(&request.local_id) {
            return Err(RemoteError::Rejected(format!(
                "save of {} refused",
                request.local_id
            )));
        }

        let mut body = request.body;
        match request.kind {
            SaveKind::Create => {
                self.creates.fetch_add(1, Ordering::SeqCst);
                let sent = body
                    .get(&self.id_field)
                    .and_then(|v| RecordId::from_value(v).ok());
                let id = match sent {
                    Some(id) if !self.assign_ids => id,
                    _ => self.fresh_id(),
                };
                body.insert(self.id_field.clone(), id.to_value());
                self.documents.insert(id, body.clone());
                Ok(body)
            }
            SaveKind::Update => {
                self.updates.fetch_add(1, Ordering::SeqCst);
                let id = body
                    .get(&self.id_field)
                    .and_then(|v| RecordId::from_value(v).ok())
                    .unwrap_or(request.local_id);
                match self.documents.get_mut(&id) {
                    Some(mut entry) => {
                        *entry = body.clone();
                        Ok(body)
                    }
                    None => Err(RemoteError::Status {
                        status: 404,
                        body: format!("no record {}", id),
                    }),
                }
            }
        }
    }

    async fn remove(&self, id: &RecordId) -> Result<(), RemoteError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.failing_removes.contains(id) {
            return Err(RemoteError::Rejected(format!("removal of {} refused", id)));
        }
        match self.documents.remove(id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::Status {
                status: 404,
                body: format!("no record {}", id),
            }),
        }
    }
}
