//! Document and collection addresses.
//!
//! A document path has an even number of segments
//! (`collection/id[/collection/id...]`), a collection path an odd number.
//! Segments are never empty and never contain `/`, so IDs taken from
//! requests cannot escape their parent.

use std::fmt;

use super::DatabaseError;

fn validate_segment(segment: &str) -> Result<(), DatabaseError> {
    if segment.is_empty() || segment.contains('/') || segment.trim() != segment {
        return Err(DatabaseError::InvalidPath(format!(
            "invalid path segment {segment:?}"
        )));
    }
    Ok(())
}

fn split(path: &str) -> Result<Vec<String>, DatabaseError> {
    let segments: Vec<String> = path.split('/').map(str::to_string).collect();
    for segment in &segments {
        validate_segment(segment)?;
    }
    Ok(segments)
}

// ═══════════════════════════════════════════════════════════
// DocPath
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    /// Parse `organizations/clinica_sur/doctors/uid-1`.
    pub fn parse(path: &str) -> Result<Self, DatabaseError> {
        let segments = split(path)?;
        if segments.len() % 2 != 0 {
            return Err(DatabaseError::InvalidPath(format!(
                "{path} does not address a document"
            )));
        }
        Ok(Self { segments })
    }

    /// Top-level document `collection/id`.
    pub fn root(collection: &str, id: &str) -> Result<Self, DatabaseError> {
        CollectionPath::root(collection)?.doc(id)
    }

    /// Document ID (last segment).
    pub fn id(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// Name of the collection holding this document.
    pub fn collection_name(&self) -> &str {
        &self.segments[self.segments.len() - 2]
    }

    /// The collection holding this document.
    pub fn collection(&self) -> CollectionPath {
        CollectionPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        }
    }

    /// Sub-collection below this document.
    pub fn sub_collection(&self, name: &str) -> Result<CollectionPath, DatabaseError> {
        validate_segment(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(CollectionPath { segments })
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.segments.len() / 2
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

// ═══════════════════════════════════════════════════════════
// CollectionPath
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    pub fn parse(path: &str) -> Result<Self, DatabaseError> {
        let segments = split(path)?;
        if segments.len() % 2 != 1 {
            return Err(DatabaseError::InvalidPath(format!(
                "{path} does not address a collection"
            )));
        }
        Ok(Self { segments })
    }

    pub fn root(name: &str) -> Result<Self, DatabaseError> {
        validate_segment(name)?;
        Ok(Self {
            segments: vec![name.to_string()],
        })
    }

    pub fn name(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// Document `id` inside this collection.
    pub fn doc(&self, id: &str) -> Result<DocPath, DatabaseError> {
        validate_segment(id)?;
        let mut segments = self.segments.clone();
        segments.push(id.to_string());
        Ok(DocPath { segments })
    }

    /// Owning document, `None` for top-level collections.
    pub fn parent(&self) -> Option<DocPath> {
        if self.segments.len() < 3 {
            return None;
        }
        Some(DocPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
