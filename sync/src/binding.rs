//! Sync coordinator.
//!
//! A [`SyncBinding`] ties one shared store to one remote channel. It listens
//! to the store's change signals and runs sync passes in a background task:
//! every dirty record is pushed, and each server response is merged back
//! through the store as soon as it arrives. Passes are single-flight; signals
//! arriving during a pass collapse into one follow-up pass.

use crate::config::Config;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::hooks::{HookSet, SyncHooks};
use crate::remote::{RemoteChannel, SaveKind, SaveRequest};
use crate::report::{Failure, PassReport, PullReport};
use crate::{lock_store, SharedStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tidepool_engine::{
    Document, Record, RecordId, RemoveOptions, SaveOptions, StoreEvent, StoreName,
    SubscriptionId, SyncStatus, Version, STATUS_FIELD,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Lifecycle state of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Closed,
}

/// Binding settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Maximum concurrent saves (and removals) during a pass
    pub max_in_flight: usize,
    /// Run a pass whenever the store signals a change
    pub auto_sync: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            auto_sync: true,
        }
    }
}

impl SyncOptions {
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Only sync on explicit [`SyncBinding::sync_now`] calls.
    pub fn manual(mut self) -> Self {
        self.auto_sync = false;
        self
    }
}

impl From<&Config> for SyncOptions {
    fn from(config: &Config) -> Self {
        Self::default().max_in_flight(config.max_in_flight)
    }
}

/// A store bound to a remote channel.
pub struct SyncBinding {
    inner: Arc<Inner>,
    subscription: Option<SubscriptionId>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    name: String,
    store_name: StoreName,
    store: SharedStore,
    remote: Arc<dyn RemoteChannel>,
    hooks: SyncHooks,
    options: SyncOptions,
    /// Change signals; a stored permit is the coalesced follow-up pass
    trigger: Notify,
    stop: Notify,
    /// Held for the duration of a pass or pull
    pass_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    syncing: AtomicBool,
}

/// What a successful push did to the local record.
enum Merged {
    /// Replaced by the server copy, now CLEAN
    Clean(Record),
    /// Edited again while in flight; local fields kept, still dirty
    Superseded(Record),
    /// Removed locally while in flight; remote removal queued
    RemovedInFlight(RecordId),
}

/// Local state captured when a record is dispatched.
struct Dispatched {
    local_id: RecordId,
    version: Version,
    request_token: Uuid,
}

impl Dispatched {
    fn prepare(record: Record, id_field: &str) -> (Self, SaveRequest) {
        let kind = match record.status() {
            SyncStatus::New => SaveKind::Create,
            _ => SaveKind::Update,
        };
        let local_id = record.id().clone();
        let version = record.version();
        let provisional = record.has_provisional_id();

        let mut body = record.into_fields();
        if provisional {
            body.remove(id_field);
        }

        let request = SaveRequest::new(kind, local_id.clone(), body);
        let dispatched = Self {
            local_id,
            version,
            request_token: request.request_token,
        };
        (dispatched, request)
    }
}

/// Clears the syncing flag when a pass or pull ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl<'a> SyncingGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncBinding {
    /// Bind `store` to `remote` and start the background sync task on the
    /// current tokio runtime.
    pub fn new(
        name: impl Into<String>,
        store: SharedStore,
        remote: impl RemoteChannel + 'static,
        hooks: SyncHooks,
        mut options: SyncOptions,
    ) -> SyncResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Runtime(e.to_string()))?;
        // A zero limit would never poll a request
        options.max_in_flight = options.max_in_flight.max(1);

        let store_name = lock_store(&store).name().to_string();
        let inner = Arc::new(Inner {
            name: name.into(),
            store_name,
            store,
            remote: Arc::new(remote),
            hooks,
            options,
            trigger: Notify::new(),
            stop: Notify::new(),
            pass_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            syncing: AtomicBool::new(false),
        });

        let subscription = options.auto_sync.then(|| {
            let weak = Arc::downgrade(&inner);
            lock_store(&inner.store).subscribe(Arc::new(move |_: &StoreEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.trigger.notify_one();
                }
            }))
        });

        let task = runtime.spawn(inner.clone().run());

        tracing::info!(
            binding = %inner.name,
            store = %inner.store_name,
            auto_sync = options.auto_sync,
            "sync binding started"
        );

        Ok(Self {
            inner,
            subscription,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn state(&self) -> SyncState {
        if self.inner.closed.load(Ordering::SeqCst) {
            SyncState::Closed
        } else if self.inner.syncing.load(Ordering::SeqCst) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Run a pass now, after any pass already in flight.
    pub async fn sync_now(&self) -> SyncResult<PassReport> {
        self.ensure_open()?;
        Ok(self.inner.pass(None).await)
    }

    /// Run a pass now, firing `hooks` in addition to the binding's own.
    pub async fn sync_now_with(&self, hooks: &SyncHooks) -> SyncResult<PassReport> {
        self.ensure_open()?;
        Ok(self.inner.pass(Some(hooks)).await)
    }

    /// Read remote documents and fold them into the store.
    ///
    /// Clean or unknown local records take the server copy; dirty ones are
    /// kept. An unfiltered pull also drops clean local records the server no
    /// longer returns.
    pub async fn pull(&self, query: Option<&Document>) -> SyncResult<PullReport> {
        self.ensure_open()?;
        self.inner.pull(query).await
    }

    /// Stop the binding and wait for a pass in flight to finish merging.
    pub async fn shutdown(&self) {
        self.close();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(binding = %self.inner.name, error = %e, "sync task ended abnormally");
            }
        }
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop.notify_one();
        if let Some(subscription) = self.subscription {
            lock_store(&self.inner.store).unsubscribe(subscription);
        }
        tracing::info!(binding = %self.inner.name, "sync binding closed");
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        Ok(())
    }
}

impl Drop for SyncBinding {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.notified() => break,
                _ = self.trigger.notified() => {}
            }
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            self.pass(None).await;
        }
        tracing::debug!(binding = %self.name, "sync task stopped");
    }

    async fn pass(&self, extra: Option<&SyncHooks>) -> PassReport {
        let _pass = self.pass_lock.lock().await;
        let _syncing = SyncingGuard::set(&self.syncing);
        let hooks = HookSet::new(&self.hooks, extra);
        let mut report = PassReport::start(self.store_name.clone());

        let dispatched: Vec<(Dispatched, SaveRequest)> = {
            let store = lock_store(&self.store);
            let id_field = store.id_field().to_string();
            store
                .dirty()
                .into_iter()
                .map(|record| Dispatched::prepare(record, &id_field))
                .collect()
        };

        let remote = self.remote.clone();
        let mut saves = stream::iter(dispatched)
            .map(|(dispatched, request)| {
                let remote = remote.clone();
                async move {
                    tracing::debug!(
                        store = %self.store_name,
                        id = %dispatched.local_id,
                        request_token = %dispatched.request_token,
                        kind = ?request.kind,
                        "pushing record"
                    );
                    let result = remote.save(request).await;
                    (dispatched, result)
                }
            })
            .buffer_unordered(self.options.max_in_flight);

        while let Some((dispatched, result)) = saves.next().await {
            let outcome = result
                .map_err(SyncError::from)
                .and_then(|echoed| self.merge(&dispatched, echoed));

            match outcome {
                Ok(Merged::Clean(record)) => {
                    tracing::debug!(
                        store = %self.store_name,
                        id = %record.id(),
                        request_token = %dispatched.request_token,
                        "record synced"
                    );
                    report.pushed.push(record.id().clone());
                    hooks.save_success(&record);
                }
                Ok(Merged::Superseded(record)) => {
                    tracing::debug!(
                        store = %self.store_name,
                        id = %record.id(),
                        request_token = %dispatched.request_token,
                        "record edited while in flight, keeping local changes"
                    );
                    report.pushed.push(record.id().clone());
                    hooks.save_success(&record);
                }
                Ok(Merged::RemovedInFlight(server_id)) => {
                    tracing::debug!(
                        store = %self.store_name,
                        id = %server_id,
                        request_token = %dispatched.request_token,
                        "record removed while in flight, queued remote removal"
                    );
                    report.pushed.push(server_id);
                }
                Err(error) => {
                    tracing::warn!(
                        store = %self.store_name,
                        id = %dispatched.local_id,
                        request_token = %dispatched.request_token,
                        error = %error,
                        "record push failed"
                    );
                    report.failed.push(Failure {
                        id: dispatched.local_id.clone(),
                        error: error.to_string(),
                    });
                    hooks.save_error(&dispatched.local_id, &error);
                }
            }
        }

        // Taken after the saves so removals queued by merges go out in this pass
        let removals = lock_store(&self.store).take_pending_removals();
        let mut requeue = Vec::new();
        let mut deletes = stream::iter(removals)
            .map(|id| {
                let remote = remote.clone();
                async move {
                    let result = remote.remove(&id).await;
                    (id, result)
                }
            })
            .buffer_unordered(self.options.max_in_flight);

        while let Some((id, result)) = deletes.next().await {
            match result {
                // Already gone remotely
                Ok(()) | Err(RemoteError::Status { status: 404, .. }) => {
                    tracing::debug!(store = %self.store_name, id = %id, "record removed remotely");
                    hooks.remove_success(&id);
                    report.removed.push(id);
                }
                Err(error) => {
                    let error = SyncError::from(error);
                    tracing::warn!(store = %self.store_name, id = %id, error = %error, "remote removal failed");
                    report.remove_failed.push(Failure {
                        id: id.clone(),
                        error: error.to_string(),
                    });
                    hooks.remove_error(&id, &error);
                    requeue.push(id);
                }
            }
        }

        if !requeue.is_empty() {
            lock_store(&self.store).requeue_removals(requeue);
        }

        let report = report.finish();
        if report.is_empty() {
            tracing::debug!(store = %self.store_name, "sync pass found nothing to do");
        } else {
            tracing::info!(
                store = %report.store,
                pushed = report.pushed.len(),
                failed = report.failed.len(),
                removed = report.removed.len(),
                remove_failed = report.remove_failed.len(),
                "sync pass finished"
            );
        }
        report
    }

    /// Fold one server response into the store.
    fn merge(&self, dispatched: &Dispatched, mut echoed: Document) -> SyncResult<Merged> {
        let mut store = lock_store(&self.store);
        let id_field = store.id_field().to_string();
        echoed.remove(STATUS_FIELD);

        let sent = echoed
            .get(&id_field)
            .filter(|value| !value.is_null())
            .map(RecordId::from_value)
            .transpose()?;
        let server_id = match sent {
            Some(id) => id,
            None => {
                echoed.insert(id_field.clone(), dispatched.local_id.to_value());
                dispatched.local_id.clone()
            }
        };
        let quiet = SaveOptions::default().silent();

        let Some((version, was_new)) = store
            .get(&dispatched.local_id)
            .map(|r| (r.version(), r.status() == SyncStatus::New))
        else {
            store.requeue_removals([server_id.clone()]);
            return Ok(Merged::RemovedInFlight(server_id));
        };

        if version == dispatched.version {
            if server_id != dispatched.local_id
                && store.reassign_id(&dispatched.local_id, server_id.clone()).is_err()
            {
                // The server identifier is already present locally
                store.remove(
                    dispatched.local_id.clone(),
                    RemoveOptions::default().silent().local_only(),
                )?;
                let taken = store
                    .get(&server_id)
                    .filter(|r| r.status().is_dirty())
                    .map(|r| (r.status(), r.fields().clone()));
                if let Some((status, fields)) = taken {
                    tracing::warn!(
                        store = %self.store_name,
                        id = %dispatched.local_id,
                        server_id = %server_id,
                        "server identifier belongs to a dirty local record, keeping local changes"
                    );
                    if status == SyncStatus::New {
                        store.save(fields, quiet.status(SyncStatus::Modified))?;
                    }
                    let record = store.get(&server_id).cloned().ok_or_else(|| vanished(&server_id))?;
                    return Ok(Merged::Superseded(record));
                }
                tracing::warn!(
                    store = %self.store_name,
                    id = %dispatched.local_id,
                    server_id = %server_id,
                    "server identifier already present locally, replacing it"
                );
            }
            store.save(Value::Object(echoed), quiet.status(SyncStatus::Clean))?;
            let merged = store.get(&server_id).cloned().ok_or_else(|| vanished(&server_id))?;
            return Ok(Merged::Clean(merged));
        }

        let mut id = dispatched.local_id.clone();
        if server_id != id {
            match store.reassign_id(&id, server_id.clone()) {
                Ok(()) => id = server_id,
                Err(e) => tracing::warn!(
                    store = %self.store_name,
                    id = %id,
                    server_id = %server_id,
                    error = %e,
                    "cannot adopt server identifier"
                ),
            }
        }
        if was_new {
            // It exists remotely now, so the next push must be an update
            if let Some(fields) = store.get(&id).map(|r| r.fields().clone()) {
                store.save(fields, quiet.status(SyncStatus::Modified))?;
            }
        }
        let record = store.get(&id).cloned().ok_or_else(|| vanished(&id))?;
        Ok(Merged::Superseded(record))
    }

    async fn pull(&self, query: Option<&Document>) -> SyncResult<PullReport> {
        let _pass = self.pass_lock.lock().await;
        let _syncing = SyncingGuard::set(&self.syncing);
        let hooks = HookSet::new(&self.hooks, None);

        let result = self
            .remote
            .read(query)
            .await
            .map_err(SyncError::from)
            .and_then(|documents| {
                let report = self.fold(&documents, query.is_none())?;
                Ok((documents, report))
            });

        match result {
            Ok((documents, report)) => {
                tracing::info!(
                    store = %report.store,
                    received = report.received,
                    applied = report.applied,
                    kept_dirty = report.kept_dirty,
                    removed = report.removed,
                    "pull finished"
                );
                hooks.read_success(&documents);
                Ok(report)
            }
            Err(error) => {
                tracing::warn!(store = %self.store_name, error = %error, "pull failed");
                hooks.read_error(&error);
                Err(error)
            }
        }
    }

    fn fold(&self, documents: &[Document], unfiltered: bool) -> SyncResult<PullReport> {
        let mut store = lock_store(&self.store);
        let id_field = store.id_field().to_string();
        let pending: HashSet<RecordId> = store.pending_removals().iter().cloned().collect();

        let mut seen = HashSet::new();
        let mut incoming = Vec::new();
        let mut kept_dirty = 0;

        for document in documents {
            let id = match document.get(&id_field).map(RecordId::from_value) {
                Some(Ok(id)) => id,
                _ => {
                    tracing::warn!(store = %self.store_name, "skipping remote document without a usable identifier");
                    continue;
                }
            };
            seen.insert(id.clone());
            if pending.contains(&id) {
                continue;
            }
            if store.get(&id).is_some_and(|r| r.status().is_dirty()) {
                kept_dirty += 1;
                continue;
            }
            let mut document = document.clone();
            document.remove(STATUS_FIELD);
            incoming.push(Value::Object(document));
        }

        let applied = incoming.len();
        if !incoming.is_empty() {
            store.save(
                incoming,
                SaveOptions::default().silent().status(SyncStatus::Clean),
            )?;
        }

        let mut removed = 0;
        if unfiltered {
            let stale: Vec<RecordId> = store
                .iter()
                .filter(|r| r.status() == SyncStatus::Clean && !seen.contains(r.id()))
                .map(|r| r.id().clone())
                .collect();
            removed = stale.len();
            if !stale.is_empty() {
                store.remove(stale, RemoveOptions::default().silent().local_only())?;
            }
        }

        Ok(PullReport {
            store: self.store_name.clone(),
            received: documents.len(),
            applied,
            kept_dirty,
            removed,
            finished_at: Utc::now(),
        })
    }
}

fn vanished(id: &RecordId) -> SyncError {
    SyncError::Remote(RemoteError::InvalidResponse(format!(
        "record {} vanished during merge",
        id
    )))
}
