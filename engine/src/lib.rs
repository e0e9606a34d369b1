//! # Tidepool Engine
//!
//! An in-memory record store that remembers what still has to be synced.
//!
//! This crate holds the client-side half of a cache that mirrors a remote
//! collection. It tracks which records were created or edited locally,
//! evaluates compound queries over them and can be snapshotted for
//! persistence. It performs no IO: pushing changes to a server is the job of
//! the `tidepool-sync` crate.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a JSON object keyed by an identifier field (`"id"` unless
//! configured otherwise). Identifiers are integers or strings ([`RecordId`]).
//! Every record carries a [`SyncStatus`]:
//! - [`SyncStatus::Clean`] - matches the last known server copy
//! - [`SyncStatus::New`] - created locally, never pushed
//! - [`SyncStatus::Modified`] - known to the server, edited locally
//!
//! ### Store
//!
//! The [`Store`] keeps records in insertion order. Saving an unseen identifier
//! inserts a NEW record, saving a known one replaces its fields and marks it
//! MODIFIED. A reset replaces the collection with CLEAN records, which is how
//! server data enters the store. Removed records leave at once; those the
//! server already knows are queued for remote removal.
//!
//! ### Queries
//!
//! A [`Query`] maps field names to a literal or a descriptor
//! `{"data": [...], "matchAny": bool}`. Array-valued record fields match when
//! they contain the candidate. Conditions combine with AND, or with OR when
//! `match_any` is set.
//!
//! ## Quick Start
//!
//! ```rust
//! use tidepool_engine::{Query, RecordId, SaveOptions, Store, SyncStatus};
//! use serde_json::json;
//!
//! let mut store = Store::new("users");
//!
//! // Server data arrives clean
//! store.reset(json!([
//!     {"id": 1, "fname": "John", "tags": [111, 222]},
//!     {"id": 2, "fname": "Jane", "tags": [333]},
//! ])).unwrap();
//!
//! // Local edits are tracked
//! store.save(json!({"id": 2, "fname": "Janet", "tags": [333]}), SaveOptions::default()).unwrap();
//! assert_eq!(store.get(&RecordId::Int(2)).unwrap().status(), SyncStatus::Modified);
//!
//! // Compound queries
//! let query = Query::new().field("fname", "John").any_of("tags", [333]);
//! assert_eq!(store.filter(&query, true).len(), 2);
//!
//! assert_eq!(store.dirty().len(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_state`] and [`Store::import_state`] with [`StoreSnapshot`]
//! for persistence.

pub mod error;
pub mod filter;
pub mod record;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use error::Error;
pub use filter::{filter, FieldCondition, Query};
pub use record::{Record, RecordId, SyncStatus, DEFAULT_ID_FIELD, STATUS_FIELD};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{
    RemoveItem, RemoveOptions, RemoveTarget, SaveInput, SaveOptions, Store, StoreConfig,
    StoreEvent, StoreEventKind, StoreObserver, SubscriptionId,
};

/// Type aliases for clarity
pub type Document = serde_json::Map<String, serde_json::Value>;
pub type StoreName = String;
pub type Version = u64;
