//! Doctor → organization lookup.
//!
//! Two strategies with identical results: an indexed collection-group scan
//! over every `doctors` collection, and a linear search of
//! `organizations/{id}/doctors/{uid}` for each organization. The search runs
//! only when the scan errors; an empty scan result is final.

use crate::models::collections::{DOCTORS, ORGANIZATIONS};

use super::{CollectionPath, DatabaseError, DocumentStore, Query};

pub fn find_doctor_organization<S: DocumentStore + ?Sized>(
    store: &S,
    uid: &str,
) -> Result<Option<String>, DatabaseError> {
    match scan_doctor_organization(store, uid) {
        Ok(found) => Ok(found),
        Err(e) => {
            tracing::warn!(error = %e, "Collection-group scan over doctors failed, searching organizations");
            search_doctor_organization(store, uid)
        }
    }
}

/// Indexed path: owning organization is segment 1 of the matched profile path.
pub fn scan_doctor_organization<S: DocumentStore + ?Sized>(
    store: &S,
    uid: &str,
) -> Result<Option<String>, DatabaseError> {
    let hits = store.collection_group(DOCTORS, &Query::new().where_eq("uid", uid))?;
    Ok(hits
        .iter()
        .filter(|hit| hit.path.depth() == 2 && hit.path.segment(0) == Some(ORGANIZATIONS))
        .find_map(|hit| hit.path.segment(1).map(str::to_string)))
}

/// Linear path: one point read per organization.
pub fn search_doctor_organization<S: DocumentStore + ?Sized>(
    store: &S,
    uid: &str,
) -> Result<Option<String>, DatabaseError> {
    let organizations = store.list_collection(&CollectionPath::root(ORGANIZATIONS)?)?;
    for org in organizations {
        let profile = org.path.sub_collection(DOCTORS)?.doc(uid)?;
        if store.get(&profile)?.is_some() {
            return Ok(Some(org.id().to_string()));
        }
    }
    Ok(None)
}
