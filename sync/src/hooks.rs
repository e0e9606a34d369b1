//! Outcome callbacks for sync passes and pulls.
//!
//! A binding carries one [`SyncHooks`] for its lifetime; a single
//! [`crate::SyncBinding::sync_now_with`] call may add more. Every hook runs
//! under `catch_unwind`: a panicking callback is logged and skipped.

use crate::error::SyncError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tidepool_engine::{Document, Record, RecordId};

type RecordHook = Arc<dyn Fn(&Record) + Send + Sync>;
type IdHook = Arc<dyn Fn(&RecordId) + Send + Sync>;
type IdErrorHook = Arc<dyn Fn(&RecordId, &SyncError) + Send + Sync>;
type DocumentsHook = Arc<dyn Fn(&[Document]) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Callbacks fired as remote calls complete.
#[derive(Clone, Default)]
pub struct SyncHooks {
    save_success: Option<RecordHook>,
    save_error: Option<IdErrorHook>,
    remove_success: Option<IdHook>,
    remove_error: Option<IdErrorHook>,
    read_success: Option<DocumentsHook>,
    read_error: Option<ErrorHook>,
}

impl fmt::Debug for SyncHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHooks")
            .field("save_success", &self.save_success.is_some())
            .field("save_error", &self.save_error.is_some())
            .field("remove_success", &self.remove_success.is_some())
            .field("remove_error", &self.remove_error.is_some())
            .field("read_success", &self.read_success.is_some())
            .field("read_error", &self.read_error.is_some())
            .finish()
    }
}

impl SyncHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the merged record after a successful push.
    pub fn on_save_success(mut self, f: impl Fn(&Record) + Send + Sync + 'static) -> Self {
        self.save_success = Some(Arc::new(f));
        self
    }

    /// Called with the local identifier of a record whose push failed.
    pub fn on_save_error(
        mut self,
        f: impl Fn(&RecordId, &SyncError) + Send + Sync + 'static,
    ) -> Self {
        self.save_error = Some(Arc::new(f));
        self
    }

    pub fn on_remove_success(mut self, f: impl Fn(&RecordId) + Send + Sync + 'static) -> Self {
        self.remove_success = Some(Arc::new(f));
        self
    }

    pub fn on_remove_error(
        mut self,
        f: impl Fn(&RecordId, &SyncError) + Send + Sync + 'static,
    ) -> Self {
        self.remove_error = Some(Arc::new(f));
        self
    }

    pub fn on_read_success(mut self, f: impl Fn(&[Document]) + Send + Sync + 'static) -> Self {
        self.read_success = Some(Arc::new(f));
        self
    }

    pub fn on_read_error(mut self, f: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        self.read_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn save_success(&self, record: &Record) {
        if let Some(hook) = &self.save_success {
            guarded("save_success", || hook(record));
        }
    }

    pub(crate) fn save_error(&self, id: &RecordId, error: &SyncError) {
        if let Some(hook) = &self.save_error {
            guarded("save_error", || hook(id, error));
        }
    }

    pub(crate) fn remove_success(&self, id: &RecordId) {
        if let Some(hook) = &self.remove_success {
            guarded("remove_success", || hook(id));
        }
    }

    pub(crate) fn remove_error(&self, id: &RecordId, error: &SyncError) {
        if let Some(hook) = &self.remove_error {
            guarded("remove_error", || hook(id, error));
        }
    }

    pub(crate) fn read_success(&self, documents: &[Document]) {
        if let Some(hook) = &self.read_success {
            guarded("read_success", || hook(documents));
        }
    }

    pub(crate) fn read_error(&self, error: &SyncError) {
        if let Some(hook) = &self.read_error {
            guarded("read_error", || hook(error));
        }
    }
}

/// Binding hooks plus the optional hooks of a single call.
#[derive(Clone, Copy)]
pub(crate) struct HookSet<'a> {
    binding: &'a SyncHooks,
    call: Option<&'a SyncHooks>,
}

impl<'a> HookSet<'a> {
    pub(crate) fn new(binding: &'a SyncHooks, call: Option<&'a SyncHooks>) -> Self {
        Self { binding, call }
    }

    fn each(&self) -> impl Iterator<Item = &'a SyncHooks> {
        std::iter::once(self.binding).chain(self.call)
    }

    pub(crate) fn save_success(&self, record: &Record) {
        self.each().for_each(|hooks| hooks.save_success(record));
    }

    pub(crate) fn save_error(&self, id: &RecordId, error: &SyncError) {
        self.each().for_each(|hooks| hooks.save_error(id, error));
    }

    pub(crate) fn remove_success(&self, id: &RecordId) {
        self.each().for_each(|hooks| hooks.remove_success(id));
    }

    pub(crate) fn remove_error(&self, id: &RecordId, error: &SyncError) {
        self.each().for_each(|hooks| hooks.remove_error(id, error));
    }

    pub(crate) fn read_success(&self, documents: &[Document]) {
        self.each().for_each(|hooks| hooks.read_success(documents));
    }

    pub(crate) fn read_error(&self, error: &SyncError) {
        self.each().for_each(|hooks| hooks.read_error(error));
    }
}

fn guarded(hook: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(hook, "sync hook panicked");
    }
}
