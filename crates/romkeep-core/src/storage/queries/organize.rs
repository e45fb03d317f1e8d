use crate::storage::models::{OrganizationEntry, OrganizationLog, OrganizationTemplate};
use crate::storage::now_rfc3339;
use crate::storage::sqlite::Database;
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::debug;

const TEMPLATE_COLUMNS: &str = "id, name, folder_pattern, file_pattern, use_1g1r, \
     region_priority, language_priority, exclude_categories";

const LOG_COLUMNS: &str = "id, source_root, destination_root, template_name, is_move, \
     total_files, succeeded, failed, skipped, total_bytes, success, message, rollback_data, \
     is_rolled_back, rolled_back_at, started_at, completed_at";

fn json_list(row: &Row, idx: usize) -> Result<Vec<String>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn to_json(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

fn template_from_row(row: &Row) -> Result<OrganizationTemplate> {
    Ok(OrganizationTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        folder_pattern: row.get(2)?,
        file_pattern: row.get(3)?,
        use_1g1r: row.get(4)?,
        region_priority: json_list(row, 5)?,
        language_priority: json_list(row, 6)?,
        exclude_categories: json_list(row, 7)?,
        is_builtin: false,
    })
}

fn log_from_row(row: &Row) -> Result<OrganizationLog> {
    Ok(OrganizationLog {
        id: row.get(0)?,
        source_root: row.get(1)?,
        destination_root: row.get(2)?,
        template_name: row.get(3)?,
        is_move: row.get(4)?,
        total_files: row.get(5)?,
        succeeded: row.get(6)?,
        failed: row.get(7)?,
        skipped: row.get(8)?,
        total_bytes: row.get(9)?,
        success: row.get(10)?,
        message: row.get(11)?,
        rollback_data: row.get(12)?,
        is_rolled_back: row.get(13)?,
        rolled_back_at: row.get(14)?,
        started_at: row.get(15)?,
        completed_at: row.get(16)?,
    })
}

fn entry_from_row(row: &Row) -> Result<OrganizationEntry> {
    Ok(OrganizationEntry {
        id: row.get(0)?,
        log_id: row.get(1)?,
        ordinal: row.get(2)?,
        operation: row.get(3)?,
        source_path: row.get(4)?,
        destination_path: row.get(5)?,
        size: row.get(6)?,
        hash: row.get(7)?,
        success: row.get(8)?,
        error_message: row.get(9)?,
        file_id: row.get(10)?,
    })
}

impl Database {
    // ── Organization Templates ───────────────────────────────────

    pub fn insert_template(&self, template: &OrganizationTemplate) -> Result<i64> {
        let conn = self.connection();
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO organization_template (name, folder_pattern, file_pattern, use_1g1r, \
             region_priority, language_priority, exclude_categories, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                template.name,
                template.folder_pattern,
                template.file_pattern,
                template.use_1g1r,
                to_json(&template.region_priority),
                to_json(&template.language_priority),
                to_json(&template.exclude_categories),
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_template(&self, template: &OrganizationTemplate) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE organization_template SET name = ?1, folder_pattern = ?2, file_pattern = ?3, \
             use_1g1r = ?4, region_priority = ?5, language_priority = ?6, \
             exclude_categories = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                template.name,
                template.folder_pattern,
                template.file_pattern,
                template.use_1g1r,
                to_json(&template.region_priority),
                to_json(&template.language_priority),
                to_json(&template.exclude_categories),
                now_rfc3339(),
                template.id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_template(&self, template_id: i64) -> Result<bool> {
        let deleted = self.connection().execute(
            "DELETE FROM organization_template WHERE id = ?1",
            params![template_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn get_template_by_name(&self, name: &str) -> Result<Option<OrganizationTemplate>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM organization_template WHERE name = ?1",
                    TEMPLATE_COLUMNS
                ),
                params![name],
                template_from_row,
            )
            .optional()
    }

    pub fn list_templates(&self) -> Result<Vec<OrganizationTemplate>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM organization_template ORDER BY name",
            TEMPLATE_COLUMNS
        ))?;
        let templates = stmt
            .query_map([], template_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(templates)
    }

    // ── Organization Logs ────────────────────────────────────────

    /// Write a finished run and all of its per-file entries.
    pub fn insert_organization_log(
        &self,
        log: &OrganizationLog,
        entries: &[OrganizationEntry],
    ) -> Result<i64> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO organization_log (source_root, destination_root, template_name, is_move, \
             total_files, succeeded, failed, skipped, total_bytes, success, message, \
             rollback_data, is_rolled_back, started_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?14)",
            params![
                log.source_root,
                log.destination_root,
                log.template_name,
                log.is_move,
                log.total_files,
                log.succeeded,
                log.failed,
                log.skipped,
                log.total_bytes,
                log.success,
                log.message,
                log.rollback_data,
                log.started_at,
                log.completed_at,
            ],
        )?;
        let log_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO organization_entry (log_id, ordinal, operation, source_path, \
                 destination_path, size, hash, success, error_message, file_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    log_id,
                    entry.ordinal,
                    entry.operation,
                    entry.source_path,
                    entry.destination_path,
                    entry.size,
                    entry.hash,
                    entry.success,
                    entry.error_message,
                    entry.file_id,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Stored organization log {} with {} entries", log_id, entries.len());
        Ok(log_id)
    }

    pub fn get_organization_log(&self, log_id: i64) -> Result<Option<OrganizationLog>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM organization_log WHERE id = ?1", LOG_COLUMNS),
                params![log_id],
                log_from_row,
            )
            .optional()
    }

    pub fn list_organization_logs(&self) -> Result<Vec<OrganizationLog>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM organization_log ORDER BY id DESC",
            LOG_COLUMNS
        ))?;
        let logs = stmt.query_map([], log_from_row)?.collect::<Result<Vec<_>>>()?;
        Ok(logs)
    }

    pub fn organization_entries(&self, log_id: i64) -> Result<Vec<OrganizationEntry>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT id, log_id, ordinal, operation, source_path, destination_path, size, hash, \
                    success, error_message, file_id \
             FROM organization_entry WHERE log_id = ?1 ORDER BY ordinal",
        )?;
        let entries = stmt
            .query_map(params![log_id], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Flip the rolled-back flag. Returns false when it was already set, so two
    /// concurrent rollbacks cannot both proceed.
    pub fn mark_log_rolled_back(&self, log_id: i64) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE organization_log SET is_rolled_back = 1, rolled_back_at = ?1 \
             WHERE id = ?2 AND is_rolled_back = 0",
            params![now_rfc3339(), log_id],
        )?;
        Ok(changed > 0)
    }
}
