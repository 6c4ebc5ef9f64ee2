use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;
use crate::request::AttachmentId;

/// Where source files come from.
pub trait SourceStore {
    /// Filesystem path of an attachment's original, if the attachment exists.
    fn source_path(&self, id: &AttachmentId) -> Result<Option<PathBuf>>;
}

impl SourceStore for HashMap<AttachmentId, PathBuf> {
    fn source_path(&self, id: &AttachmentId) -> Result<Option<PathBuf>> {
        Ok(self.get(id).cloned())
    }
}

/// Receives attachment lifecycle events.
pub trait AttachmentListener {
    fn on_source_edited(&self, id: &AttachmentId);
    fn on_source_deleted(&self, id: &AttachmentId);
}

/// A single attachment row
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Unique database ID
    pub id: i64,
    /// Full path to the original file
    pub path: String,
    /// Filename only (e.g., "DSC_0001.jpg")
    pub filename: String,
    /// Unix seconds
    pub imported_at: i64,
    /// Unix seconds of the last edit, if any
    pub edited_at: Option<i64>,
}

/// The Library manages the SQLite attachment catalog.
///
/// Edits and deletes are announced to every subscribed listener after the
/// row change has been written.
pub struct Library {
    conn: Connection,
    db_path: Option<PathBuf>,
    listeners: Vec<Box<dyn AttachmentListener>>,
}

impl Library {
    /// Open (or create) the catalog at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::ResizeError::cache_write(parent, e))?;
        }
        let conn = Connection::open(db_path)?;
        debug!("library opened at {}", db_path.display());
        Self::with_connection(conn, Some(db_path.to_path_buf()))
    }

    /// Catalog that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        let library = Library {
            conn,
            db_path,
            listeners: Vec::new(),
        };
        library.init_schema()?;
        Ok(library)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS attachments (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                path            TEXT NOT NULL,
                filename        TEXT NOT NULL,
                imported_at     INTEGER NOT NULL,
                edited_at       INTEGER
            )",
            [],
        )?;
        Ok(())
    }

    /// Path of the database file, `None` for in-memory catalogs
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Register a listener for edit and delete events.
    pub fn subscribe(&mut self, listener: Box<dyn AttachmentListener>) {
        self.listeners.push(listener);
    }

    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM attachments", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Add a file to the catalog and return its id.
    pub fn import(&self, path: &Path) -> Result<i64> {
        let path_str = path.to_string_lossy();
        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        self.conn.execute(
            "INSERT INTO attachments (path, filename, imported_at) VALUES (?1, ?2, ?3)",
            params![path_str, filename, Utc::now().timestamp()],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id, path = %path.display(), "imported attachment");
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<Attachment>> {
        let attachment = self
            .conn
            .query_row(
                "SELECT id, path, filename, imported_at, edited_at FROM attachments WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Attachment {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        filename: row.get(2)?,
                        imported_at: row.get(3)?,
                        edited_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(attachment)
    }

    /// Point an attachment at a new file. Returns false if the id is unknown.
    pub fn edit(&self, id: i64, new_path: &Path) -> Result<bool> {
        let filename = new_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let changed = self.conn.execute(
            "UPDATE attachments SET path = ?1, filename = ?2, edited_at = ?3 WHERE id = ?4",
            params![new_path.to_string_lossy(), filename, Utc::now().timestamp(), id],
        )?;
        if changed > 0 {
            let id = AttachmentId::try_from(id)?;
            for listener in &self.listeners {
                listener.on_source_edited(&id);
            }
        }
        Ok(changed > 0)
    }

    /// Drop an attachment. Returns false if the id is unknown.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM attachments WHERE id = ?1", params![id])?;
        if changed > 0 {
            let id = AttachmentId::try_from(id)?;
            for listener in &self.listeners {
                listener.on_source_deleted(&id);
            }
        }
        Ok(changed > 0)
    }
}

impl SourceStore for Library {
    fn source_path(&self, id: &AttachmentId) -> Result<Option<PathBuf>> {
        // Ids that are not integers can't be rows here
        let Ok(row_id) = id.as_str().parse::<i64>() else {
            return Ok(None);
        };
        Ok(self.get(row_id)?.map(|a| PathBuf::from(a.path)))
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
