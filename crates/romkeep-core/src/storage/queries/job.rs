use super::file::upsert_file;
use crate::storage::models::{
    FileMatch, JobStatus, ScanCheckpoint, ScanJob, ScanPhase, ScannedFile,
};
use crate::storage::sqlite::Database;
use crate::storage::{decode_cursor, now_rfc3339, Page};
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::debug;

const JOB_COLUMNS: &str = "id, drive_id, target_path, priority, status, phase, rehash, \
     total_files, processed_files, verified_files, unknown_files, error_files, total_bytes, \
     processed_bytes, last_processed_path, last_processed_entry, resume_count, error_message, \
     created_at, started_at, completed_at, updated_at";

fn job_from_row(row: &Row) -> Result<ScanJob> {
    Ok(ScanJob {
        id: row.get(0)?,
        drive_id: row.get(1)?,
        target_path: row.get(2)?,
        priority: row.get(3)?,
        status: row.get(4)?,
        phase: row.get(5)?,
        rehash: row.get(6)?,
        total_files: row.get(7)?,
        processed_files: row.get(8)?,
        verified_files: row.get(9)?,
        unknown_files: row.get(10)?,
        error_files: row.get(11)?,
        total_bytes: row.get(12)?,
        processed_bytes: row.get(13)?,
        last_processed_path: row.get(14)?,
        last_processed_entry: row.get(15)?,
        resume_count: row.get(16)?,
        error_message: row.get(17)?,
        created_at: row.get(18)?,
        started_at: row.get(19)?,
        completed_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

impl Database {
    // ── Scan Jobs ────────────────────────────────────────────────

    pub fn insert_scan_job(&self, job: &ScanJob) -> Result<i64> {
        let conn = self.connection();
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO scan_job (drive_id, target_path, priority, status, phase, rehash, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                job.drive_id,
                job.target_path,
                job.priority,
                job.status,
                job.phase,
                job.rehash,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_scan_job(&self, job_id: i64) -> Result<Option<ScanJob>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM scan_job WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                job_from_row,
            )
            .optional()
    }

    pub fn list_scan_jobs(&self) -> Result<Vec<ScanJob>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scan_job ORDER BY id DESC",
            JOB_COLUMNS
        ))?;
        let jobs = stmt.query_map([], job_from_row)?.collect::<Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn list_scan_jobs_page(&self, cursor: Option<&str>, limit: usize) -> crate::Result<Page<ScanJob>> {
        let after = decode_cursor(cursor)?;
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scan_job WHERE id > ?1 ORDER BY id LIMIT ?2",
            JOB_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![after, limit as i64 + 1], job_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::from_rows(rows, limit, |j| j.id))
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<ScanJob>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scan_job WHERE status = ?1 ORDER BY id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![status], job_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Move a job to `status`. `started_at` is set on the first start,
    /// `completed_at` whenever the job stops for good or fails.
    pub fn update_job_status(
        &self,
        job_id: i64,
        status: JobStatus,
        phase: ScanPhase,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = now_rfc3339();
        let finished = matches!(
            status,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        );
        self.connection().execute(
            "UPDATE scan_job SET status = ?1, phase = ?2, error_message = ?3, updated_at = ?4, \
                 started_at = CASE WHEN ?1 = 'running' THEN COALESCE(started_at, ?4) ELSE started_at END, \
                 completed_at = CASE WHEN ?5 THEN ?4 ELSE NULL END \
             WHERE id = ?6",
            params![status, phase, error_message, now, finished, job_id],
        )?;
        debug!("Scan job {} -> {} ({})", job_id, status, phase);
        Ok(())
    }

    pub fn set_job_phase(&self, job_id: i64, phase: ScanPhase) -> Result<()> {
        self.connection().execute(
            "UPDATE scan_job SET phase = ?1, updated_at = ?2 WHERE id = ?3",
            params![phase, now_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn set_job_totals(&self, job_id: i64, total_files: i64, total_bytes: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE scan_job SET total_files = ?1, total_bytes = ?2, updated_at = ?3 WHERE id = ?4",
            params![total_files, total_bytes, now_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn increment_resume_count(&self, job_id: i64) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            "UPDATE scan_job SET resume_count = resume_count + 1, updated_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), job_id],
        )?;
        conn.query_row(
            "SELECT resume_count FROM scan_job WHERE id = ?1",
            params![job_id],
            |row| row.get(0),
        )
    }

    /// Persist a batch of processed files and advance the job's checkpoint in
    /// one transaction, so the checkpoint never names an unwritten file.
    pub fn commit_scan_batch(
        &self,
        job_id: i64,
        files: &[(ScannedFile, Vec<FileMatch>)],
        checkpoint: &ScanCheckpoint,
    ) -> Result<Vec<i64>> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(files.len());
        for (file, matches) in files {
            ids.push(upsert_file(&tx, file, matches)?);
        }
        tx.execute(
            "UPDATE scan_job SET last_processed_path = ?1, last_processed_entry = ?2, \
                 processed_files = ?3, verified_files = ?4, unknown_files = ?5, \
                 error_files = ?6, processed_bytes = ?7, updated_at = ?8 \
             WHERE id = ?9",
            params![
                checkpoint.last_processed_path,
                checkpoint.last_processed_entry,
                checkpoint.processed_files,
                checkpoint.verified_files,
                checkpoint.unknown_files,
                checkpoint.error_files,
                checkpoint.processed_bytes,
                now_rfc3339(),
                job_id
            ],
        )?;
        tx.commit()?;
        debug!(
            "Job {} committed {} files (checkpoint {:?})",
            job_id,
            files.len(),
            checkpoint.last_processed_path
        );
        Ok(ids)
    }
}
