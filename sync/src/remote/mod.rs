//! Remote channel abstraction.
//!
//! A [`RemoteChannel`] is the coordinator's only view of the server: read the
//! collection, save one record, remove one record. Implementations decide how
//! that maps onto a wire protocol.

mod memory;
mod rest;

pub use memory::MemoryChannel;
pub use rest::RestChannel;

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tidepool_engine::{Document, RecordId};
use uuid::Uuid;

/// Whether a save creates a new remote record or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SaveKind {
    Create,
    Update,
}

/// One record pushed to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub kind: SaveKind,
    /// Client-side token correlating this request with its response
    pub request_token: Uuid,
    /// Identifier of the record in the local store at dispatch
    pub local_id: RecordId,
    /// Field set sent to the server. Creates of records with a synthesized
    /// identifier omit the identifier field.
    pub body: Document,
}

impl SaveRequest {
    pub fn new(kind: SaveKind, local_id: RecordId, body: Document) -> Self {
        Self {
            kind,
            request_token: Uuid::new_v4(),
            local_id,
            body,
        }
    }

    /// Identifier to address on the remote, if the body carries one.
    pub fn remote_id(&self, id_field: &str) -> Option<RecordId> {
        self.body
            .get(id_field)
            .and_then(|value| RecordId::from_value(value).ok())
    }
}

/// The server side of a binding.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Read remote documents, optionally narrowed by `query`.
    async fn read(&self, query: Option<&Document>) -> Result<Vec<Document>, RemoteError>;

    /// Create or update one record. Returns the server's copy.
    async fn save(&self, request: SaveRequest) -> Result<Document, RemoteError>;

    /// Remove one record.
    async fn remove(&self, id: &RecordId) -> Result<(), RemoteError>;
}

#[async_trait]
impl<T: RemoteChannel + ?Sized> RemoteChannel for Arc<T> {
    async fn read(&self, query: Option<&Document>) -> Result<Vec<Document>, RemoteError> {
        (**self).read(query).await
    }

    async fn save(&self, request: SaveRequest) -> Result<Document, RemoteError> {
        (**self).save(request).await
    }

    async fn remove(&self, id: &RecordId) -> Result<(), RemoteError> {
        (**self).remove(id).await
    }
}

/// Normalize a response body to a list of documents: an array of objects, or
/// a single object.
pub fn documents_from_value(value: Value) -> Result<Vec<Document>, RemoteError> {
    match value {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                _ => Err(RemoteError::InvalidResponse(
                    "expected an array of objects".into(),
                )),
            })
            .collect(),
        _ => Err(RemoteError::InvalidResponse(
            "expected an object or an array of objects".into(),
        )),
    }
}

/// The single document echoed by a save: an object, or the first element of
/// an array.
pub fn echoed_document(value: Value) -> Result<Document, RemoteError> {
    documents_from_value(value)?
        .into_iter()
        .next()
        .ok_or_else(|| RemoteError::InvalidResponse("empty response to save".into()))
}
