use crate::catalog::{HashKind, RomHashes};
use crate::storage::models::{FileMatch, FileStatus, ScannedFile};
use crate::storage::sqlite::Database;
use crate::storage::{decode_cursor, now_rfc3339, Page};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use tracing::debug;

pub(crate) const FILE_COLUMNS: &str = "id, drive_id, relative_path, file_name, archive_path, \
     inner_path, size, modified_at, crc32, md5, sha1, header_size, headerless_crc32, \
     headerless_md5, headerless_sha1, is_online, status, error_message, scan_job_id, \
     first_seen_at, last_seen_at, verified_at";

pub(crate) fn file_from_row(row: &Row) -> Result<ScannedFile> {
    let header_size: Option<i64> = row.get(11)?;
    let headerless = RomHashes {
        crc32: row.get(12)?,
        md5: row.get(13)?,
        sha1: row.get(14)?,
    };
    Ok(ScannedFile {
        id: row.get(0)?,
        drive_id: row.get(1)?,
        relative_path: row.get(2)?,
        file_name: row.get(3)?,
        archive_path: row.get(4)?,
        inner_path: row.get(5)?,
        size: row.get(6)?,
        modified_at: row.get(7)?,
        hashes: RomHashes {
            crc32: row.get(8)?,
            md5: row.get(9)?,
            sha1: row.get(10)?,
        },
        header_size,
        headerless_hashes: header_size.map(|_| headerless),
        is_online: row.get(15)?,
        status: row.get(16)?,
        error_message: row.get(17)?,
        scan_job_id: row.get(18)?,
        first_seen_at: row.get(19)?,
        last_seen_at: row.get(20)?,
        verified_at: row.get(21)?,
    })
}

fn match_from_row(row: &Row) -> Result<FileMatch> {
    Ok(FileMatch {
        id: row.get(0)?,
        file_id: row.get(1)?,
        catalog_id: row.get(2)?,
        game_id: row.get(3)?,
        rom_id: row.get(4)?,
        match_type: row.get(5)?,
        headerless: row.get(6)?,
        rom_status: row.get(7)?,
        catalog_name: row.get(8)?,
        game_name: row.get(9)?,
        rom_name: row.get(10)?,
    })
}

/// Insert or update one file keyed on `(drive_id, relative_path)` and replace
/// its matches. Returns the row id.
pub(crate) fn upsert_file(conn: &Connection, file: &ScannedFile, matches: &[FileMatch]) -> Result<i64> {
    let headerless = file.headerless_hashes.clone().unwrap_or_default();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO scanned_file \
         (drive_id, relative_path, file_name, archive_path, inner_path, size, modified_at, \
          crc32, md5, sha1, header_size, headerless_crc32, headerless_md5, headerless_sha1, \
          is_online, status, error_message, scan_job_id, first_seen_at, last_seen_at, verified_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
                 ?19, ?20, ?21) \
         ON CONFLICT(drive_id, relative_path) DO UPDATE SET \
             file_name = excluded.file_name, \
             archive_path = excluded.archive_path, \
             inner_path = excluded.inner_path, \
             size = excluded.size, \
             modified_at = excluded.modified_at, \
             crc32 = excluded.crc32, \
             md5 = excluded.md5, \
             sha1 = excluded.sha1, \
             header_size = excluded.header_size, \
             headerless_crc32 = excluded.headerless_crc32, \
             headerless_md5 = excluded.headerless_md5, \
             headerless_sha1 = excluded.headerless_sha1, \
             is_online = excluded.is_online, \
             status = excluded.status, \
             error_message = excluded.error_message, \
             scan_job_id = excluded.scan_job_id, \
             last_seen_at = excluded.last_seen_at, \
             verified_at = excluded.verified_at",
    )?;
    stmt.execute(params![
        file.drive_id,
        file.relative_path,
        file.file_name,
        file.archive_path,
        file.inner_path,
        file.size,
        file.modified_at,
        file.hashes.crc32,
        file.hashes.md5,
        file.hashes.sha1,
        file.header_size,
        headerless.crc32,
        headerless.md5,
        headerless.sha1,
        file.is_online,
        file.status,
        file.error_message,
        file.scan_job_id,
        file.first_seen_at,
        file.last_seen_at,
        file.verified_at,
    ])?;

    let id: i64 = conn.query_row(
        "SELECT id FROM scanned_file WHERE drive_id IS ?1 AND relative_path = ?2",
        params![file.drive_id, file.relative_path],
        |row| row.get(0),
    )?;
    replace_matches(conn, id, matches)?;
    Ok(id)
}

pub(crate) fn replace_matches(conn: &Connection, file_id: i64, matches: &[FileMatch]) -> Result<()> {
    conn.execute("DELETE FROM file_match WHERE file_id = ?1", params![file_id])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO file_match (file_id, catalog_id, game_id, rom_id, match_type, headerless, rom_status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for m in matches {
        stmt.execute(params![
            file_id,
            m.catalog_id,
            m.game_id,
            m.rom_id,
            m.match_type,
            m.headerless,
            m.rom_status
        ])?;
    }
    Ok(())
}

impl Database {
    // ── Scanned Files ────────────────────────────────────────────

    pub fn upsert_scanned_file(&self, file: &ScannedFile, matches: &[FileMatch]) -> Result<i64> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let id = upsert_file(&tx, file, matches)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_scanned_file(&self, file_id: i64) -> Result<Option<ScannedFile>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM scanned_file WHERE id = ?1", FILE_COLUMNS),
                params![file_id],
                file_from_row,
            )
            .optional()
    }

    pub fn get_scanned_file_by_path(
        &self,
        drive_id: i64,
        relative_path: &str,
    ) -> Result<Option<ScannedFile>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM scanned_file WHERE drive_id = ?1 AND relative_path = ?2",
                    FILE_COLUMNS
                ),
                params![drive_id, relative_path],
                file_from_row,
            )
            .optional()
    }

    /// Files of one drive (or every file), in id order.
    pub fn list_scanned_files(&self, drive_id: Option<i64>) -> Result<Vec<ScannedFile>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scanned_file WHERE ?1 IS NULL OR drive_id = ?1 ORDER BY id",
            FILE_COLUMNS
        ))?;
        let files = stmt
            .query_map(params![drive_id], file_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn list_scanned_files_page(
        &self,
        drive_id: Option<i64>,
        status: Option<FileStatus>,
        cursor: Option<&str>,
        limit: usize,
    ) -> crate::Result<Page<ScannedFile>> {
        let after = decode_cursor(cursor)?;
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scanned_file \
             WHERE id > ?1 AND (?2 IS NULL OR drive_id = ?2) AND (?3 IS NULL OR status = ?3) \
             ORDER BY id LIMIT ?4",
            FILE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![after, drive_id, status, limit as i64 + 1],
                file_from_row,
            )?
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::from_rows(rows, limit, |f| f.id))
    }

    pub fn files_with_status(&self, status: FileStatus) -> Result<Vec<ScannedFile>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scanned_file WHERE status = ?1 ORDER BY id",
            FILE_COLUMNS
        ))?;
        let files = stmt
            .query_map(params![status], file_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Files carrying `value` for the given algorithm, full-file or headerless.
    pub fn find_files_by_hash(&self, kind: HashKind, value: &str) -> Result<Vec<ScannedFile>> {
        let (full, headerless) = match kind {
            HashKind::Sha1 => ("sha1", "headerless_sha1"),
            HashKind::Md5 => ("md5", "headerless_md5"),
            HashKind::Crc32 => ("crc32", "headerless_crc32"),
        };
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scanned_file WHERE {} = ?1 OR {} = ?1 ORDER BY id",
            FILE_COLUMNS, full, headerless
        ))?;
        let files = stmt
            .query_map(params![value.to_ascii_lowercase()], file_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn count_files_by_status(&self, drive_id: Option<i64>) -> Result<Vec<(FileStatus, i64)>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM scanned_file \
             WHERE ?1 IS NULL OR drive_id = ?1 GROUP BY status ORDER BY status",
        )?;
        let counts = stmt
            .query_map(params![drive_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(counts)
    }

    pub fn matches_for_file(&self, file_id: i64) -> Result<Vec<FileMatch>> {
        let conn = self.connection();
        let mut stmt = conn.prepare_cached(
            "SELECT m.id, m.file_id, m.catalog_id, m.game_id, m.rom_id, m.match_type, \
                    m.headerless, m.rom_status, c.name, g.name, r.name \
             FROM file_match m \
             JOIN catalog c ON c.id = m.catalog_id \
             JOIN catalog_game g ON g.id = m.game_id \
             JOIN catalog_rom r ON r.id = m.rom_id \
             WHERE m.file_id = ?1 ORDER BY m.id",
        )?;
        let matches = stmt
            .query_map(params![file_id], match_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(matches)
    }

    /// Store a fresh verification result for an already hashed file.
    pub fn update_file_verification(
        &self,
        file_id: i64,
        status: FileStatus,
        error_message: Option<&str>,
        matches: &[FileMatch],
    ) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE scanned_file SET status = ?1, error_message = ?2, verified_at = ?3 WHERE id = ?4",
            params![status, error_message, now_rfc3339(), file_id],
        )?;
        replace_matches(&tx, file_id, matches)?;
        tx.commit()?;
        Ok(())
    }

    /// Point every record stored at `old_path` on `old_drive` (the file itself,
    /// or the members of an archive there) at its new location.
    ///
    /// Records already stored at the new location describe a file that is no
    /// longer there and are replaced.
    pub fn relocate_disk_path(
        &self,
        old_drive: Option<i64>,
        old_path: &str,
        new_drive: Option<i64>,
        new_path: &str,
    ) -> Result<usize> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let file_name = new_path.rsplit('/').next().unwrap_or(new_path).to_string();

        if old_drive != new_drive || old_path != new_path {
            let stale = tx.execute(
                "DELETE FROM scanned_file \
                 WHERE drive_id IS ?1 AND (relative_path = ?2 OR archive_path = ?2)",
                params![new_drive, new_path],
            )?;
            if stale > 0 {
                debug!("Dropped {} stale records at {}", stale, new_path);
            }
        }

        let moved_files = tx.execute(
            "UPDATE scanned_file SET drive_id = ?1, relative_path = ?2, file_name = ?3, \
                 is_online = 1, last_seen_at = ?4 \
             WHERE drive_id IS ?5 AND relative_path = ?6 AND archive_path IS NULL",
            params![new_drive, new_path, file_name, now_rfc3339(), old_drive, old_path],
        )?;
        let moved_members = tx.execute(
            "UPDATE scanned_file SET drive_id = ?1, \
                 relative_path = ?2 || substr(relative_path, length(archive_path) + 1), \
                 archive_path = ?2, is_online = 1, last_seen_at = ?3 \
             WHERE drive_id IS ?4 AND archive_path = ?5",
            params![new_drive, new_path, now_rfc3339(), old_drive, old_path],
        )?;
        tx.commit()?;
        debug!(
            "Relocated {} -> {} ({} files, {} archive members)",
            old_path, new_path, moved_files, moved_members
        );
        Ok(moved_files + moved_members)
    }

    pub fn delete_scanned_file(&self, file_id: i64) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM scanned_file WHERE id = ?1", params![file_id])?;
        Ok(deleted > 0)
    }
}
