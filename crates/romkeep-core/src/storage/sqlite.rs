use rusqlite::{Connection, Result};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA_VERSION: i64 = 1;

/// SQLite handle shared by every subsystem.
///
/// The connection sits behind a mutex so one `Arc<Database>` can be handed to
/// scan workers, the health monitor and the organizer at the same time.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.connection().execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA mmap_size = 268435456;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 64MB cache, 256MB mmap)");
        Ok(())
    }

    /// Create the schema on a fresh database. Existing data is never dropped.
    fn migrate_schema(&self) -> Result<()> {
        let conn = self.connection();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        conn.execute_batch(include_str!("schema.sql"))?;
        debug!(
            "SQLite schema initialized (version {} -> {})",
            version, SCHEMA_VERSION
        );
        Ok(())
    }

    /// Lock the connection. A panic in another holder does not poison access
    /// for everyone else; SQLite rolls back whatever that holder left open.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn truncate_all(&self) -> Result<()> {
        self.connection().execute_batch(
            "DELETE FROM organization_entry;
             DELETE FROM organization_log;
             DELETE FROM organization_template;
             DELETE FROM file_match;
             DELETE FROM scanned_file;
             DELETE FROM scan_job;
             DELETE FROM catalog_rom;
             DELETE FROM catalog_game;
             DELETE FROM catalog;
             DELETE FROM drive;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}
