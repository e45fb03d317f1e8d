use crate::storage::models::Drive;
use crate::storage::sqlite::Database;
use crate::storage::{decode_cursor, now_rfc3339, Page};
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::debug;

const DRIVE_COLUMNS: &str = "id, label, root_path, volume_id, is_online, is_enabled, is_ssd, \
     total_bytes, free_bytes, last_seen_at, last_scanned_at, created_at";

fn drive_from_row(row: &Row) -> Result<Drive> {
    Ok(Drive {
        id: row.get(0)?,
        label: row.get(1)?,
        root_path: row.get(2)?,
        volume_id: row.get(3)?,
        is_online: row.get(4)?,
        is_enabled: row.get(5)?,
        is_ssd: row.get(6)?,
        total_bytes: row.get(7)?,
        free_bytes: row.get(8)?,
        last_seen_at: row.get(9)?,
        last_scanned_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Fresh health-check observation for one drive.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveObservation {
    pub is_online: bool,
    /// New root when the volume turned up at a different mount point.
    pub root_path: Option<String>,
    pub total_bytes: Option<i64>,
    pub free_bytes: Option<i64>,
}

impl Database {
    // ── Drives ───────────────────────────────────────────────────

    pub fn insert_drive(&self, drive: &Drive) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO drive (label, root_path, volume_id, is_online, is_enabled, is_ssd, \
             total_bytes, free_bytes, last_seen_at, last_scanned_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                drive.label,
                drive.root_path,
                drive.volume_id,
                drive.is_online,
                drive.is_enabled,
                drive.is_ssd,
                drive.total_bytes,
                drive.free_bytes,
                drive.last_seen_at,
                drive.last_scanned_at,
                drive.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_drive(&self, drive_id: i64) -> Result<Option<Drive>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM drive WHERE id = ?1", DRIVE_COLUMNS),
                params![drive_id],
                drive_from_row,
            )
            .optional()
    }

    pub fn get_drive_by_root(&self, root_path: &str) -> Result<Option<Drive>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM drive WHERE root_path = ?1", DRIVE_COLUMNS),
                params![root_path],
                drive_from_row,
            )
            .optional()
    }

    pub fn list_drives(&self) -> Result<Vec<Drive>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM drive ORDER BY id", DRIVE_COLUMNS))?;
        let drives = stmt.query_map([], drive_from_row)?.collect::<Result<Vec<_>>>()?;
        Ok(drives)
    }

    pub fn list_drives_page(&self, cursor: Option<&str>, limit: usize) -> crate::Result<Page<Drive>> {
        let after = decode_cursor(cursor)?;
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM drive WHERE id > ?1 ORDER BY id LIMIT ?2",
            DRIVE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![after, limit as i64 + 1], drive_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::from_rows(rows, limit, |d| d.id))
    }

    /// Record a health check. Scanned files on the drive mirror its online
    /// flag in the same transaction.
    pub fn record_drive_observation(&self, drive_id: i64, obs: &DriveObservation) -> Result<bool> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let now = now_rfc3339();
        let changed = tx.execute(
            "UPDATE drive SET is_online = ?1, \
                 root_path = COALESCE(?2, root_path), \
                 total_bytes = COALESCE(?3, total_bytes), \
                 free_bytes = COALESCE(?4, free_bytes), \
                 last_seen_at = CASE WHEN ?1 THEN ?5 ELSE last_seen_at END \
             WHERE id = ?6",
            params![
                obs.is_online,
                obs.root_path,
                obs.total_bytes,
                obs.free_bytes,
                now,
                drive_id
            ],
        )?;
        let files = tx.execute(
            "UPDATE scanned_file SET is_online = ?1 WHERE drive_id = ?2 AND is_online != ?1",
            params![obs.is_online, drive_id],
        )?;
        tx.commit()?;
        debug!(
            "Drive {} observed online={} ({} file rows flipped)",
            drive_id, obs.is_online, files
        );
        Ok(changed > 0)
    }

    pub fn set_drive_enabled(&self, drive_id: i64, enabled: bool) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE drive SET is_enabled = ?1 WHERE id = ?2",
            params![enabled, drive_id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_drive_label(&self, drive_id: i64, label: &str) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE drive SET label = ?1 WHERE id = ?2",
            params![label, drive_id],
        )?;
        Ok(changed > 0)
    }

    pub fn touch_drive_scanned(&self, drive_id: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE drive SET last_scanned_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), drive_id],
        )?;
        Ok(())
    }

    /// Delete a drive. Its scanned files stay, detached and offline.
    pub fn delete_drive(&self, drive_id: i64) -> Result<bool> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE scanned_file SET is_online = 0 WHERE drive_id = ?1",
            params![drive_id],
        )?;
        let deleted = tx.execute("DELETE FROM drive WHERE id = ?1", params![drive_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}
