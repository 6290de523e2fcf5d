use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing;

use super::{
    merge_documents, CollectionPath, DatabaseError, DocPath, Document, DocumentStore, Query,
    SetMode, StoredDocument,
};

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Wait this long for another connection's write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA journal_mode=DELETE;
         PRAGMA foreign_keys=ON;",
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![
        (1, include_str!("../../resources/migrations/001_documents.sql")),
        (2, include_str!("../../resources/migrations/002_collection_group_index.sql")),
    ];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| DatabaseError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get::<_, i64>(0),
    )
    .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════
// SqliteStore
// ═══════════════════════════════════════════════════════════

/// Durable `DocumentStore`: one row per document, body stored as JSON text.
///
/// `parent` holds the collection path and `collection` its last segment,
/// which is what the collection-group scan filters on.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

fn read_document(conn: &Connection, path: &DocPath) -> Result<Option<Document>, DatabaseError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE path = ?1",
            params![path.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|text| serde_json::from_str(&text).map_err(DatabaseError::from))
        .transpose()
}

fn write_document(conn: &Connection, path: &DocPath, data: &Document) -> Result<(), DatabaseError> {
    let body = serde_json::to_string(data)?;
    let parent = path.collection();
    conn.execute(
        "INSERT INTO documents (path, parent, collection, doc_id, data, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
         ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![
            path.to_string(),
            parent.to_string(),
            parent.name(),
            path.id(),
            body,
        ],
    )?;
    Ok(())
}

fn collect_rows(
    stmt: &mut rusqlite::Statement<'_>,
    param: &str,
) -> Result<Vec<StoredDocument>, DatabaseError> {
    let rows = stmt
        .query_map(params![param], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(path, body)| -> Result<StoredDocument, DatabaseError> {
            Ok(StoredDocument {
                path: DocPath::parse(&path)?,
                data: serde_json::from_str(&body)?,
            })
        })
        .collect()
}

impl DocumentStore for SqliteStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>, DatabaseError> {
        let conn = self.lock()?;
        read_document(&conn, path)
    }

    fn set(&self, path: &DocPath, data: Document, mode: SetMode) -> Result<(), DatabaseError> {
        let mut conn = self.lock()?;
        // Take the write lock before reading so concurrent writers queue up.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let next = match (mode, read_document(&tx, path)?) {
            (SetMode::Merge, Some(mut existing)) => {
                merge_documents(&mut existing, data);
                existing
            }
            _ => data,
        };
        write_document(&tx, path, &next)?;
        tx.commit()?;
        Ok(())
    }

    fn create(&self, path: &DocPath, data: Document) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let body = serde_json::to_string(&data)?;
        let parent = path.collection();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents (path, parent, collection, doc_id, data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![
                path.to_string(),
                parent.to_string(),
                parent.name(),
                path.id(),
                body,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn modify(
        &self,
        path: &DocPath,
        f: &mut dyn FnMut(Option<Document>) -> Option<Document>,
    ) -> Result<Option<Document>, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = read_document(&tx, path)?;
        let result = match f(current.clone()) {
            Some(next) => {
                write_document(&tx, path, &next)?;
                Some(next)
            }
            None => current,
        };
        tx.commit()?;
        Ok(result)
    }

    fn delete(&self, path: &DocPath) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM documents WHERE path = ?1",
            params![path.to_string()],
        )?;
        Ok(deleted > 0)
    }

    fn list_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path, data FROM documents WHERE parent = ?1 ORDER BY path")?;
        collect_rows(&mut stmt, &collection.to_string())
    }

    fn collection_group(
        &self,
        name: &str,
        query: &Query,
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path, data FROM documents WHERE collection = ?1 ORDER BY path")?;
        let candidates = collect_rows(&mut stmt, name)?;
        Ok(query.apply(candidates))
    }
}

/// Count tables in the database (for verification)
pub fn count_tables(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}
