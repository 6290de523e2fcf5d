//! In-memory document store.
//!
//! Backs tests and `CLINILINK_DB=:memory:` runs. The collection-group scan can
//! be switched off to reproduce a backend without the index it needs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    merge_documents, CollectionPath, DatabaseError, DocPath, Document, DocumentStore, Query,
    SetMode, StoredDocument,
};

pub struct MemoryStore {
    docs: RwLock<BTreeMap<DocPath, Document>>,
    collection_group_enabled: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            collection_group_enabled: AtomicBool::new(true),
        }
    }

    /// Make every `collection_group` call fail with `Unsupported`.
    pub fn disable_collection_group(&self) {
        self.collection_group_enabled.store(false, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<DocPath, Document>>, DatabaseError> {
        self.docs.read().map_err(|_| DatabaseError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<DocPath, Document>>, DatabaseError> {
        self.docs.write().map_err(|_| DatabaseError::LockPoisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>, DatabaseError> {
        Ok(self.read()?.get(path).cloned())
    }

    fn set(&self, path: &DocPath, data: Document, mode: SetMode) -> Result<(), DatabaseError> {
        let mut docs = self.write()?;
        match (mode, docs.get_mut(path)) {
            (SetMode::Merge, Some(existing)) => merge_documents(existing, data),
            _ => {
                docs.insert(path.clone(), data);
            }
        }
        Ok(())
    }

    fn create(&self, path: &DocPath, data: Document) -> Result<bool, DatabaseError> {
        let mut docs = self.write()?;
        if docs.contains_key(path) {
            return Ok(false);
        }
        docs.insert(path.clone(), data);
        Ok(true)
    }

    fn modify(
        &self,
        path: &DocPath,
        f: &mut dyn FnMut(Option<Document>) -> Option<Document>,
    ) -> Result<Option<Document>, DatabaseError> {
        let mut docs = self.write()?;
        let current = docs.get(path).cloned();
        match f(current.clone()) {
            Some(next) => {
                docs.insert(path.clone(), next.clone());
                Ok(Some(next))
            }
            None => Ok(current),
        }
    }

    fn delete(&self, path: &DocPath) -> Result<bool, DatabaseError> {
        Ok(self.write()?.remove(path).is_some())
    }

    fn list_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        let docs = self.read()?;
        Ok(docs
            .iter()
            .filter(|(path, _)| &path.collection() == collection)
            .map(|(path, data)| StoredDocument {
                path: path.clone(),
                data: data.clone(),
            })
            .collect())
    }

    fn collection_group(
        &self,
        name: &str,
        query: &Query,
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        if !self.collection_group_enabled.load(Ordering::SeqCst) {
            return Err(DatabaseError::Unsupported(format!(
                "collection-group scan over {name}"
            )));
        }
        let docs = self.read()?;
        let candidates = docs
            .iter()
            .filter(|(path, _)| path.collection_name() == name)
            .map(|(path, data)| StoredDocument {
                path: path.clone(),
                data: data.clone(),
            })
            .collect();
        Ok(query.apply(candidates))
    }
}
