//! Document store layer.
//!
//! Hierarchical collections keyed by string IDs, addressed by
//! slash-separated paths (`organizations/{id}/doctors/{uid}`).
//! Services receive an `Arc<dyn DocumentStore>` at construction and never
//! reach for a process-wide handle.

pub mod locate;
pub mod memory;
pub mod path;
pub mod query;
pub mod sqlite;

pub use memory::MemoryStore;
pub use path::{CollectionPath, DocPath};
pub use query::{Direction, Filter, Query};
pub use sqlite::*;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A stored document body: a JSON object.
pub type Document = serde_json::Map<String, Value>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Unsupported query: {0}")]
    Unsupported(String),

    #[error("Internal lock error")]
    LockPoisoned,
}

/// How `set` treats an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Replace the whole document.
    Overwrite,
    /// Merge fields into the existing document (nested objects merge recursively).
    Merge,
}

/// A document together with the path it lives at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub path: DocPath,
    pub data: Document,
}

impl StoredDocument {
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

/// Storage capability consumed by every service.
///
/// Each call is independent; `create` and `modify` are the only operations
/// that are atomic across a read and a write.
pub trait DocumentStore: Send + Sync {
    fn get(&self, path: &DocPath) -> Result<Option<Document>, DatabaseError>;

    fn set(&self, path: &DocPath, data: Document, mode: SetMode) -> Result<(), DatabaseError>;

    /// Insert only if no document exists at `path`. Returns `false` when one already did.
    fn create(&self, path: &DocPath, data: Document) -> Result<bool, DatabaseError>;

    /// Atomic read-modify-write.
    ///
    /// The closure receives the current document (`None` if absent). Returning
    /// `Some` writes that document; returning `None` leaves the store untouched.
    /// Yields the document stored at `path` once the call completes.
    fn modify(
        &self,
        path: &DocPath,
        f: &mut dyn FnMut(Option<Document>) -> Option<Document>,
    ) -> Result<Option<Document>, DatabaseError>;

    /// Returns `true` if a document was removed.
    fn delete(&self, path: &DocPath) -> Result<bool, DatabaseError>;

    /// All documents directly inside `collection`, ordered by path.
    fn list_collection(&self, collection: &CollectionPath)
        -> Result<Vec<StoredDocument>, DatabaseError>;

    fn query(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        Ok(query.apply(self.list_collection(collection)?))
    }

    /// Scan every collection named `name`, whatever its ancestors.
    fn collection_group(&self, name: &str, query: &Query)
        -> Result<Vec<StoredDocument>, DatabaseError>;

    /// Organization owning the doctor profile `uid`, if any.
    ///
    /// Tries the collection-group scan first and searches organizations one by
    /// one only when the scan itself errors.
    fn find_doctor_organization(&self, uid: &str) -> Result<Option<String>, DatabaseError> {
        locate::find_doctor_organization(self, uid)
    }
}

/// Merge `patch` into `target`. Objects merge key by key; anything else overwrites.
pub fn merge_documents(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_documents(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Serialize a model into a document body.
pub fn encode<T: Serialize>(value: &T) -> Result<Document, DatabaseError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(DatabaseError::Unsupported(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Deserialize a document body into a model.
pub fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, DatabaseError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}
