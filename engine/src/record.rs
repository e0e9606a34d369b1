//! Record types for storing data.

use crate::{error::Result, Document, Error, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Reserved field under which a record's sync status is exposed in its
/// document form. Caller data may not use this name.
pub const STATUS_FIELD: &str = "_syncStatus";

/// Identifier field used when a store is not configured otherwise.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Synchronization state of a record relative to the last known server copy.
///
/// Removal is not a status: removed records leave the collection at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SyncStatus {
    /// Matches the last known server state
    #[default]
    Clean = 0,
    /// Created locally, never successfully pushed
    New = 1,
    /// Exists remotely but has local edits not yet pushed
    Modified = 2,
}

impl SyncStatus {
    /// Integer tag exposed on record documents.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the record still needs to be pushed.
    pub fn is_dirty(self) -> bool {
        !matches!(self, SyncStatus::Clean)
    }

    /// Status after a local write to a record currently in this state.
    ///
    /// A record that never reached the server stays `New`.
    pub fn after_local_write(self) -> Self {
        match self {
            SyncStatus::New => SyncStatus::New,
            SyncStatus::Clean | SyncStatus::Modified => SyncStatus::Modified,
        }
    }
}

impl From<SyncStatus> for u8 {
    fn from(status: SyncStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for SyncStatus {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(SyncStatus::Clean),
            1 => Ok(SyncStatus::New),
            2 => Ok(SyncStatus::Modified),
            other => Err(format!("unknown sync status: {}", other)),
        }
    }
}

/// Identifier value of a record: an integer or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    /// Read an identifier out of a JSON value.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(RecordId::Str(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(id) => Ok(RecordId::Int(id)),
                None if n.is_u64() => Err(Error::InvalidArgument(format!(
                    "identifier {} is out of range for a 64-bit signed integer",
                    n
                ))),
                None => Err(Error::InvalidArgument(format!(
                    "identifier must be an integer, got {}",
                    n
                ))),
            },
            other => Err(Error::InvalidArgument(format!(
                "identifier must be an integer or a string, got {}",
                value_kind(other)
            ))),
        }
    }

    /// JSON form of the identifier.
    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(n) => Value::from(*n),
            RecordId::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

impl From<i32> for RecordId {
    fn from(n: i32) -> Self {
        RecordId::Int(n.into())
    }
}

impl From<u32> for RecordId {
    fn from(n: u32) -> Self {
        RecordId::Int(n.into())
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Str(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Str(s)
    }
}

impl From<&RecordId> for RecordId {
    fn from(id: &RecordId) -> Self {
        id.clone()
    }
}

/// A data record in the store.
///
/// Records handed out by the store are copies. Editing one with [`Record::set`]
/// changes nothing until it is saved back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    id: RecordId,
    /// All fields, including the identifier field
    fields: Document,
    status: SyncStatus,
    /// Store revision of the last write to this record
    version: Version,
    /// Identifier was synthesized locally and never confirmed by the server
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    provisional_id: bool,
}

impl Record {
    /// Create a new record. `fields` is expected to already hold the
    /// identifier under the store's identifier field.
    pub fn new(id: impl Into<RecordId>, fields: Document, status: SyncStatus) -> Self {
        Self {
            id: id.into(),
            fields,
            status,
            version: 1,
            provisional_id: false,
        }
    }

    pub(crate) fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn with_provisional_id(mut self, provisional: bool) -> Self {
        self.provisional_id = provisional;
        self
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether the identifier was synthesized by the store.
    pub fn has_provisional_id(&self) -> bool {
        self.provisional_id
    }

    pub fn fields(&self) -> &Document {
        &self.fields
    }

    pub fn into_fields(self) -> Document {
        self.fields
    }

    /// Get a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Resolve a field, falling back to a dotted path through nested objects
    /// (`"address.city"`) when no top-level field has that exact name.
    pub fn lookup(&self, field: &str) -> Option<&Value> {
        if let Some(value) = self.fields.get(field) {
            return Some(value);
        }
        if !field.contains('.') {
            return None;
        }
        let mut parts = field.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a field on this copy.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Document form with the status tag under [`STATUS_FIELD`].
    pub fn to_document(&self) -> Document {
        let mut document = self.fields.clone();
        document.insert(STATUS_FIELD.to_string(), Value::from(self.status.code()));
        document
    }

    pub(crate) fn replace_fields(&mut self, fields: Document) {
        self.fields = fields;
    }

    pub(crate) fn set_status(&mut self, status: SyncStatus) {
        self.status = status;
        // A provisional identifier only means something until the first push.
        if status != SyncStatus::New {
            self.provisional_id = false;
        }
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn set_id(&mut self, id: RecordId, id_field: &str) {
        self.fields.insert(id_field.to_string(), id.to_value());
        self.id = id;
        self.provisional_id = false;
    }
}

impl std::ops::Index<&str> for Record {
    type Output = Value;

    /// Absent fields index to `Value::Null`, like `serde_json::Value`.
    fn index(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(field).unwrap_or(&NULL)
    }
}

/// Short name of a JSON value's type, for error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
