//! Summaries of sync passes and pulls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidepool_engine::{RecordId, StoreName};

/// A record or removal the remote refused during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub id: RecordId,
    pub error: String,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub store: StoreName,
    /// Server identifiers of records the remote accepted
    pub pushed: Vec<RecordId>,
    /// Records left dirty
    pub failed: Vec<Failure>,
    /// Identifiers removed remotely
    pub removed: Vec<RecordId>,
    /// Removals put back on the queue
    pub remove_failed: Vec<Failure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PassReport {
    pub(crate) fn start(store: impl Into<StoreName>) -> Self {
        let now = Utc::now();
        Self {
            store: store.into(),
            pushed: Vec::new(),
            failed: Vec::new(),
            removed: Vec::new(),
            remove_failed: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// Whether the pass had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.pushed.is_empty()
            && self.failed.is_empty()
            && self.removed.is_empty()
            && self.remove_failed.is_empty()
    }

    /// Whether every remote call succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.remove_failed.is_empty()
    }
}

/// Outcome of a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub store: StoreName,
    /// Documents the remote returned
    pub received: usize,
    /// Local records replaced or inserted from the server copy
    pub applied: usize,
    /// Dirty local records left untouched
    pub kept_dirty: usize,
    /// Clean local records the server no longer has
    pub removed: usize,
    pub finished_at: DateTime<Utc>,
}
