//! # Tidepool Sync
//!
//! Keeps a [`tidepool_engine::Store`] eventually consistent with a remote
//! collection.
//!
//! A [`SyncBinding`] subscribes to a shared store and, whenever the store
//! changes, pushes every dirty record through a [`RemoteChannel`] and merges
//! the server's copy back. Records whose push fails stay dirty and are retried
//! by the next pass; records edited while their push was in flight keep the
//! newer local edit.
//!
//! ```no_run
//! use serde_json::json;
//! use tidepool_engine::{SaveOptions, Store};
//! use tidepool_sync::{lock_store, shared, RestChannel, SyncBinding, SyncHooks, SyncOptions};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = shared(Store::new("users"));
//! let remote = RestChannel::new("http://localhost:3000/users", "id", Duration::from_secs(10))?;
//! let binding = SyncBinding::new("users", store.clone(), remote, SyncHooks::new(), SyncOptions::default())?;
//!
//! lock_store(&store).save(json!({"id": 1, "fname": "John"}), SaveOptions::default())?;
//! let report = binding.sync_now().await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod config;
pub mod error;
pub mod hooks;
pub mod remote;
pub mod report;

pub use binding::{SyncBinding, SyncOptions, SyncState};
pub use config::{Config, ConfigError};
pub use error::{RemoteError, SyncError, SyncResult};
pub use hooks::SyncHooks;
pub use remote::{MemoryChannel, RemoteChannel, RestChannel, SaveKind, SaveRequest};
pub use report::{Failure, PassReport, PullReport};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tidepool_engine::Store;

/// A store shared between callers and a binding.
pub type SharedStore = Arc<Mutex<Store>>;

/// Wrap a store for sharing.
pub fn shared(store: Store) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock a shared store, recovering it if a previous holder panicked.
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
