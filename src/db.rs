//! SQLite-backed library registry and catalog

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::{Result, ScanError};
use crate::models::{CatalogEntry, Library, LibraryId, LibraryStatus};
use crate::store::{Catalog, LibraryRegistry};

const LIBRARY_COLUMNS: &str = "id, name, path, status";
const FILE_COLUMNS: &str = "id, library_id, file_path, file_name, size, last_modified";

/// Registry and catalog stored in one SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create database
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        store.migrate_schema()?;
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS media_library (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ok'
            );

            CREATE TABLE IF NOT EXISTS media_file (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                library_id INTEGER NOT NULL REFERENCES media_library(id) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                size INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (library_id, file_path)
            );
            CREATE INDEX IF NOT EXISTS idx_media_file_path ON media_file(file_path);
            ",
        )?;
        Ok(())
    }

    /// Migrate schema for databases created before library status was tracked
    fn migrate_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        let has_status: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('media_library') WHERE name='status'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_status {
            conn.execute(
                "ALTER TABLE media_library ADD COLUMN status TEXT NOT NULL DEFAULT 'ok'",
                [],
            )?;
        }

        Ok(())
    }

    /// Number of catalog entries across all libraries
    pub fn file_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM media_file", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn library_from_row(row: &Row<'_>) -> rusqlite::Result<Library> {
    Ok(Library {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        status: LibraryStatus::from_db(&row.get::<_, String>(3)?),
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    Ok(CatalogEntry {
        id: Some(row.get(0)?),
        library_id: row.get(1)?,
        path: row.get(2)?,
        name: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        mtime: row.get(5)?,
    })
}

impl LibraryRegistry for SqliteStore {
    fn list_libraries(&self) -> Result<Vec<Library>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LIBRARY_COLUMNS} FROM media_library ORDER BY id"
        ))?;
        let rows = stmt.query_map([], library_from_row)?;

        let mut libraries = Vec::new();
        for row in rows {
            libraries.push(row?);
        }
        Ok(libraries)
    }

    fn get_library(&self, id: LibraryId) -> Result<Option<Library>> {
        let library = self
            .conn
            .lock()
            .query_row(
                &format!("SELECT {LIBRARY_COLUMNS} FROM media_library WHERE id = ?1"),
                [id],
                library_from_row,
            )
            .optional()?;
        Ok(library)
    }

    fn create_library(&self, name: &str, root_path: &str) -> Result<Library> {
        let library = self.conn.lock().query_row(
            &format!(
                "INSERT INTO media_library (name, path, status) VALUES (?1, ?2, ?3)
                 RETURNING {LIBRARY_COLUMNS}"
            ),
            params![name, root_path, LibraryStatus::Ok.as_str()],
            library_from_row,
        )?;
        Ok(library)
    }

    fn save_library(&self, library: &Library) -> Result<Library> {
        let saved = self
            .conn
            .lock()
            .query_row(
                &format!(
                    "UPDATE media_library SET name = ?2, path = ?3, status = ?4 WHERE id = ?1
                     RETURNING {LIBRARY_COLUMNS}"
                ),
                params![
                    library.id,
                    library.name,
                    library.root_path,
                    library.status.as_str()
                ],
                library_from_row,
            )
            .optional()?;
        saved.ok_or_else(|| ScanError::database_error(format!("No library with id {}", library.id)))
    }

    fn delete_library(&self, id: LibraryId) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM media_library WHERE id = ?1", [id])?;
        Ok(())
    }
}

impl Catalog for SqliteStore {
    fn find_by_library(&self, library_id: LibraryId) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM media_file WHERE library_id = ?1 ORDER BY file_path"
        ))?;
        let rows = stmt.query_map([library_id], entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn find_by_path(&self, library_id: LibraryId, path: &str) -> Result<Option<CatalogEntry>> {
        let entry = self
            .conn
            .lock()
            .query_row(
                &format!(
                    "SELECT {FILE_COLUMNS} FROM media_file WHERE library_id = ?1 AND file_path = ?2"
                ),
                params![library_id, path],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn save(&self, entry: &CatalogEntry) -> Result<CatalogEntry> {
        let conn = self.conn.lock();
        let saved = match entry.id {
            None => conn.query_row(
                &format!(
                    "INSERT INTO media_file (library_id, file_path, file_name, size, last_modified)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (library_id, file_path) DO UPDATE SET
                         size = excluded.size,
                         last_modified = excluded.last_modified,
                         updated_at = CURRENT_TIMESTAMP
                     RETURNING {FILE_COLUMNS}"
                ),
                params![
                    entry.library_id,
                    entry.path,
                    entry.name,
                    entry.size as i64,
                    entry.mtime
                ],
                entry_from_row,
            )?,
            Some(id) => conn
                .query_row(
                    &format!(
                        "UPDATE media_file SET file_name = ?2, size = ?3, last_modified = ?4,
                             updated_at = CURRENT_TIMESTAMP
                         WHERE id = ?1
                         RETURNING {FILE_COLUMNS}"
                    ),
                    params![id, entry.name, entry.size as i64, entry.mtime],
                    entry_from_row,
                )
                .optional()?
                .ok_or_else(|| {
                    ScanError::database_error(format!("No catalog entry with id {}", id))
                })?,
        };
        Ok(saved)
    }

    fn delete(&self, entry: &CatalogEntry) -> Result<()> {
        let conn = self.conn.lock();
        match entry.id {
            Some(id) => conn.execute("DELETE FROM media_file WHERE id = ?1", [id])?,
            None => conn.execute(
                "DELETE FROM media_file WHERE library_id = ?1 AND file_path = ?2",
                params![entry.library_id, entry.path],
            )?,
        };
        Ok(())
    }
}
