use super::context::TemplateContext;
use super::plan::{mark_conflicts, OrganizePlan, PlanItem};
use super::template::{render, validate_template};
use crate::catalog::RomStatus;
use crate::config::OrganizeConfig;
use crate::dedupe::{resolve_families, FamilyResolution};
use crate::drives::DriveRegistry;
use crate::error::{Error, Result};
use crate::platform;
use crate::progress::ProgressReporter;
use crate::storage::models::{
    CatalogGameRecord, CatalogRecord, FileMatch, FileStatus, OperationKind, OrganizationEntry,
    OrganizationLog, OrganizationTemplate, ScannedFile,
};
use crate::storage::{now_rfc3339, Database};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One organize run.
#[derive(Debug, Clone)]
pub struct OrganizeRequest {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub template: OrganizationTemplate,
    /// Copy when false. Only moves can be rolled back.
    pub is_move: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizeResult {
    /// `None` for a dry run.
    pub log_id: Option<i64>,
    pub dry_run: bool,
    pub plan: OrganizePlan,
    pub entries: Vec<OrganizationEntry>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_bytes: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackResult {
    pub log_id: i64,
    pub restored: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub message: String,
}

/// Stored as the log's `rollback_data`: where each successful move left its
/// catalog records, so rollback can point them back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RollbackData {
    moves: Vec<RelocatedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelocatedFile {
    ordinal: i64,
    source_drive: Option<i64>,
    source_relative: String,
    destination_drive: Option<i64>,
    destination_relative: Option<String>,
}

impl RelocatedFile {
    /// A move whose records still point at the source.
    fn unrecorded(ordinal: i64, item: &PlanItem) -> Self {
        Self {
            ordinal,
            source_drive: item.drive_id,
            source_relative: item.relative_path.clone(),
            destination_drive: None,
            destination_relative: None,
        }
    }
}

/// Plans, executes and rolls back organize runs over verified files.
pub struct OrganizeEngine {
    db: Arc<Database>,
    drives: Arc<DriveRegistry>,
}

impl OrganizeEngine {
    pub fn new(db: Arc<Database>, drives: Arc<DriveRegistry>) -> Self {
        Self { db, drives }
    }

    /// Every verified file below `source_root` and where the template puts
    /// it. Nothing on disk changes.
    pub fn plan(&self, request: &OrganizeRequest) -> Result<OrganizePlan> {
        let start = Instant::now();
        let validation = validate_template(&request.template);
        if !validation.is_valid() {
            return Err(Error::validation(format!(
                "template '{}': {}",
                request.template.name,
                validation.problems().join("; ")
            )));
        }
        if !request.source_root.is_dir() {
            return Err(Error::not_found(format!(
                "source {} is not a directory",
                request.source_root.display()
            )));
        }
        let source_root = platform::normalize_root(&request.source_root)?;
        let destination_root = absolute_destination(&request.destination_root)?;

        let (drive, prefix) = self.drives.drive_for_path(&source_root)?.ok_or_else(|| {
            Error::not_found(format!(
                "{} is not on a registered drive",
                source_root.display()
            ))
        })?;
        let drive_root = PathBuf::from(&drive.root_path);

        let mut by_disk_path: BTreeMap<String, Vec<ScannedFile>> = BTreeMap::new();
        for file in self.db.files_with_status(FileStatus::Verified)? {
            if file.drive_id != Some(drive.id) || !is_below(file.disk_relative_path(), &prefix) {
                continue;
            }
            by_disk_path
                .entry(file.disk_relative_path().to_string())
                .or_default()
                .push(file);
        }

        let mut lookups = Lookups::default();
        let mut owned: AHashMap<i64, CatalogGameRecord> = AHashMap::new();
        let mut items = Vec::with_capacity(by_disk_path.len());
        for (disk_path, mut files) in by_disk_path {
            files.sort_by_key(|f| f.id);
            let source = join_slash_path(&drive_root, &disk_path);
            let size = fs::metadata(&source)
                .map(|m| m.len())
                .unwrap_or_else(|_| files.iter().map(|f| f.size.max(0) as u64).sum());
            let mut item = PlanItem {
                file_ids: files.iter().map(|f| f.id).collect(),
                destination: source.clone(),
                source,
                drive_id: Some(drive.id),
                relative_path: disk_path.clone(),
                size,
                hash: match files.as_slice() {
                    [single] if !single.is_archive_member() => {
                        single.hashes.canonical().map(|h| h.to_string())
                    }
                    _ => None,
                },
                game_id: None,
                game_name: None,
                skip_reason: None,
            };

            let Some((file, file_match)) = self.first_match(&files)? else {
                item.skip("no catalog match");
                items.push(item);
                continue;
            };
            let Some(game) = lookups.game(&self.db, file_match.game_id)? else {
                item.skip(format!("catalog title {} no longer exists", file_match.game_id));
                items.push(item);
                continue;
            };
            item.game_id = Some(game.id);
            item.game_name = Some(game.game.name.clone());
            let Some(catalog) = lookups.catalog(&self.db, game.catalog_id)? else {
                item.skip(format!("catalog {} no longer exists", game.catalog_id));
                items.push(item);
                continue;
            };

            let context = TemplateContext::for_file(&catalog, &game.game, &file_match.rom_name, file);
            let folder = render(&request.template.folder_pattern, &context);
            let mut file_name = render(&request.template.file_pattern, &context);
            if file_name.is_empty() {
                file_name = disk_path.rsplit('/').next().unwrap_or(&disk_path).to_string();
            }
            item.destination = if folder.is_empty() {
                join_slash_path(&destination_root, &file_name)
            } else {
                join_slash_path(&destination_root, &format!("{}/{}", folder, file_name))
            };
            owned.insert(game.id, game);
            items.push(item);
        }

        if request.template.use_1g1r {
            let owned: Vec<CatalogGameRecord> = owned.into_values().collect();
            let resolution = resolve_families(&owned, &selection_config(&request.template));
            skip_unselected(&mut items, &resolution);
        }
        mark_conflicts(&mut items);

        let plan = OrganizePlan {
            source_root,
            destination_root,
            template_name: request.template.name.clone(),
            is_move: request.is_move,
            items,
        };
        info!(
            "Planned {} files ({} skipped) with template '{}' in {:.2}s",
            plan.planned_count(),
            plan.skipped_count(),
            plan.template_name,
            start.elapsed().as_secs_f64()
        );
        Ok(plan)
    }

    /// The plan as a result, without executing it.
    pub fn dry_run(&self, request: &OrganizeRequest) -> Result<OrganizeResult> {
        let plan = self.plan(request)?;
        let skipped = plan.skipped_count();
        let planned = plan.planned_count();
        let total_bytes = plan.planned_bytes();
        let verb = if request.is_move { "move" } else { "copy" };
        Ok(OrganizeResult {
            log_id: None,
            dry_run: true,
            message: format!("would {} {} files, {} skipped", verb, planned, skipped),
            plan,
            entries: Vec::new(),
            succeeded: 0,
            failed: 0,
            skipped,
            total_bytes,
        })
    }

    /// Plan, then move or copy every planned file. A failed file is recorded
    /// and the run continues; the log is written once at the end.
    ///
    /// Once a file has moved, a failure to update its records is noted on the
    /// entry and never aborts the run, so the log always covers every move.
    pub fn execute(&self, request: &OrganizeRequest, reporter: &dyn ProgressReporter) -> Result<OrganizeResult> {
        let start = Instant::now();
        let started_at = now_rfc3339();
        let plan = self.plan(request)?;
        let total = plan.items.len();
        reporter.on_organize_start(plan.planned_count());

        let operation = if request.is_move {
            OperationKind::Move
        } else {
            OperationKind::Copy
        };
        let mut entries = Vec::with_capacity(total);
        let mut rollback = RollbackData::default();
        let (mut succeeded, mut failed, mut skipped) = (0usize, 0usize, 0usize);
        let mut total_bytes = 0u64;

        for (index, item) in plan.items.iter().enumerate() {
            let ordinal = index as i64;
            let mut entry = OrganizationEntry {
                id: 0,
                log_id: 0,
                ordinal,
                operation,
                source_path: item.source.to_string_lossy().into_owned(),
                destination_path: item.destination.to_string_lossy().into_owned(),
                size: item.size as i64,
                hash: item.hash.clone(),
                success: false,
                error_message: None,
                file_id: item.file_ids.first().copied(),
            };

            if let Some(reason) = &item.skip_reason {
                debug!("Skipping {}: {}", item.source.display(), reason);
                entry.operation = OperationKind::Skip;
                entry.error_message = Some(reason.clone());
                skipped += 1;
            } else {
                match transfer(&item.source, &item.destination, request.is_move) {
                    Ok(()) => {
                        entry.success = true;
                        succeeded += 1;
                        total_bytes += item.size;
                        if request.is_move {
                            match self.relocate_records(ordinal, item) {
                                Ok(relocated) => rollback.moves.push(relocated),
                                Err(e) => {
                                    warn!(
                                        "Moved '{}' but could not update its records: {}",
                                        item.source.display(),
                                        e
                                    );
                                    entry.error_message = Some(format!("records not updated: {}", e));
                                    rollback.moves.push(RelocatedFile::unrecorded(ordinal, item));
                                }
                            }
                        }
                        debug!("{} {} -> {}", operation, item.source.display(), item.destination.display());
                    }
                    Err(e) => {
                        error!(
                            "Failed to {} '{}' to '{}': {}",
                            operation,
                            item.source.display(),
                            item.destination.display(),
                            e
                        );
                        entry.error_message = Some(e.to_string());
                        failed += 1;
                    }
                }
            }
            entries.push(entry);
            reporter.on_organize_progress(index + 1, total, &item.source.to_string_lossy());
        }

        let verb = if request.is_move { "moved" } else { "copied" };
        let message = format!("{} {}, {} failed, {} skipped", succeeded, verb, failed, skipped);
        let log = OrganizationLog {
            id: 0,
            source_root: plan.source_root.to_string_lossy().into_owned(),
            destination_root: plan.destination_root.to_string_lossy().into_owned(),
            template_name: plan.template_name.clone(),
            is_move: request.is_move,
            total_files: total as i64,
            succeeded: succeeded as i64,
            failed: failed as i64,
            skipped: skipped as i64,
            total_bytes: total_bytes as i64,
            success: failed == 0,
            message: Some(message.clone()),
            rollback_data: Some(serde_json::to_string(&rollback)?),
            is_rolled_back: false,
            rolled_back_at: None,
            started_at,
            completed_at: Some(now_rfc3339()),
        };
        let log_id = self.db.insert_organization_log(&log, &entries)?;
        for entry in &mut entries {
            entry.log_id = log_id;
        }

        let elapsed = start.elapsed().as_secs_f64();
        reporter.on_organize_complete(succeeded, failed, skipped, elapsed);
        info!("Organize run {}: {} in {:.2}s", log_id, message, elapsed);

        Ok(OrganizeResult {
            log_id: Some(log_id),
            dry_run: false,
            plan,
            entries,
            succeeded,
            failed,
            skipped,
            total_bytes,
            message,
        })
    }

    /// Move every successfully moved file of a run back where it came from,
    /// last first. A log can be rolled back once.
    pub fn rollback(&self, log_id: i64) -> Result<RollbackResult> {
        let log = self
            .db
            .get_organization_log(log_id)?
            .ok_or_else(|| Error::not_found(format!("organization log {}", log_id)))?;
        if log.is_rolled_back {
            return Err(Error::invalid_state(format!(
                "organization log {} was already rolled back at {}",
                log_id,
                log.rolled_back_at.as_deref().unwrap_or("an unknown time")
            )));
        }
        if !log.is_move {
            return Err(Error::invalid_state(format!(
                "organization log {} copied files; only moves can be rolled back",
                log_id
            )));
        }
        let data: RollbackData = match log.rollback_data.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => RollbackData::default(),
        };
        if !self.db.mark_log_rolled_back(log_id)? {
            return Err(Error::invalid_state(format!(
                "organization log {} was already rolled back",
                log_id
            )));
        }

        let relocated: AHashMap<i64, &RelocatedFile> = data.moves.iter().map(|m| (m.ordinal, m)).collect();
        let destination_root = PathBuf::from(&log.destination_root);
        let mut restored = 0usize;
        let mut failed = 0usize;
        let mut errors = Vec::new();

        let entries = self.db.organization_entries(log_id)?;
        for entry in entries
            .iter()
            .rev()
            .filter(|e| e.success && e.operation == OperationKind::Move)
        {
            let original = Path::new(&entry.source_path);
            let moved = Path::new(&entry.destination_path);
            let outcome = if !moved.is_file() {
                Err(format!("{} is missing", moved.display()))
            } else if original.exists() {
                Err(format!("{} is occupied", original.display()))
            } else {
                transfer(moved, original, true).map_err(|e| e.to_string())
            };

            match outcome {
                Ok(()) => {
                    restored += 1;
                    if let Some(file) = relocated.get(&entry.ordinal) {
                        if let Some(relative) = &file.destination_relative {
                            // The log is already claimed; keep restoring the rest.
                            if let Err(e) = self.db.relocate_disk_path(
                                file.destination_drive,
                                relative,
                                file.source_drive,
                                &file.source_relative,
                            ) {
                                warn!("Restored {} but could not update its records: {}", original.display(), e);
                                errors.push(format!(
                                    "{} restored, records not updated: {}",
                                    original.display(),
                                    e
                                ));
                            }
                        }
                    }
                    remove_empty_parents(moved, &destination_root);
                    debug!("Restored {} -> {}", moved.display(), original.display());
                }
                Err(e) => {
                    warn!("Rollback of entry {} failed: {}", entry.ordinal, e);
                    failed += 1;
                    errors.push(e);
                }
            }
        }

        let message = format!("{} restored, {} failed", restored, failed);
        info!("Rolled back organization log {}: {}", log_id, message);
        Ok(RollbackResult {
            log_id,
            restored,
            failed,
            errors,
            message,
        })
    }

    pub fn logs(&self) -> Result<Vec<OrganizationLog>> {
        Ok(self.db.list_organization_logs()?)
    }

    pub fn log(&self, log_id: i64) -> Result<(OrganizationLog, Vec<OrganizationEntry>)> {
        let log = self
            .db
            .get_organization_log(log_id)?
            .ok_or_else(|| Error::not_found(format!("organization log {}", log_id)))?;
        let entries = self.db.organization_entries(log_id)?;
        Ok((log, entries))
    }

    /// The best match among `files`: a non-bad-dump one when there is any.
    fn first_match<'a>(&self, files: &'a [ScannedFile]) -> Result<Option<(&'a ScannedFile, FileMatch)>> {
        let mut fallback = None;
        for file in files {
            for file_match in self.db.matches_for_file(file.id)? {
                if file_match.rom_status != RomStatus::BadDump {
                    return Ok(Some((file, file_match)));
                }
                if fallback.is_none() {
                    fallback = Some((file, file_match));
                }
            }
        }
        Ok(fallback)
    }

    /// Point the moved file's records at the destination, when it is on a
    /// registered drive.
    fn relocate_records(&self, ordinal: i64, item: &PlanItem) -> Result<RelocatedFile> {
        let mut relocated = RelocatedFile::unrecorded(ordinal, item);
        if let Some((drive, relative)) = self.drives.drive_for_path(&item.destination)? {
            self.db
                .relocate_disk_path(item.drive_id, &item.relative_path, Some(drive.id), &relative)?;
            relocated.destination_drive = Some(drive.id);
            relocated.destination_relative = Some(relative);
        }
        Ok(relocated)
    }
}

/// Catalog rows looked up once per plan.
#[derive(Default)]
struct Lookups {
    games: AHashMap<i64, Option<CatalogGameRecord>>,
    catalogs: AHashMap<i64, Option<CatalogRecord>>,
}

impl Lookups {
    fn game(&mut self, db: &Database, game_id: i64) -> Result<Option<CatalogGameRecord>> {
        if !self.games.contains_key(&game_id) {
            let game = db.get_catalog_game(game_id)?;
            self.games.insert(game_id, game);
        }
        Ok(self.games.get(&game_id).cloned().flatten())
    }

    fn catalog(&mut self, db: &Database, catalog_id: i64) -> Result<Option<CatalogRecord>> {
        if !self.catalogs.contains_key(&catalog_id) {
            let catalog = db.get_catalog(catalog_id)?;
            self.catalogs.insert(catalog_id, catalog);
        }
        Ok(self.catalogs.get(&catalog_id).cloned().flatten())
    }
}

/// Among the titles being organized, skip all but the 1G1R choice of each
/// family, and every title in an excluded category.
fn skip_unselected(items: &mut [PlanItem], resolution: &FamilyResolution) {
    for item in items.iter_mut().filter(|i| !i.is_skipped()) {
        let (Some(game_id), Some(name)) = (item.game_id, item.game_name.as_deref()) else {
            continue;
        };
        if resolution.excluded.iter().any(|e| e == name) {
            item.skip("excluded category");
        } else if !resolution.is_selected(game_id) {
            let winner = resolution
                .selections
                .iter()
                .find(|s| s.rejected.iter().any(|r| r == name))
                .map_or("another title", |s| s.game_name.as_str());
            item.skip(format!("1G1R prefers {}", winner));
        }
    }
}

fn selection_config(template: &OrganizationTemplate) -> OrganizeConfig {
    OrganizeConfig {
        region_priority: template.region_priority.clone(),
        language_priority: template.language_priority.clone(),
        exclude_categories: template.exclude_categories.clone(),
    }
}

fn is_below(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('/'))
}

fn join_slash_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

fn absolute_destination(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(platform::normalize_root(path)?);
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Move (rename, else copy and delete) or copy `source` to `destination`,
/// creating parent folders. Never overwrites.
fn transfer(source: &Path, destination: &Path, is_move: bool) -> io::Result<()> {
    if destination.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", destination.display()),
        ));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if !is_move {
        fs::copy(source, destination)?;
        return Ok(());
    }
    if let Err(e) = fs::rename(source, destination) {
        debug!("rename {} failed ({}), copying instead", source.display(), e);
        fs::copy(source, destination)?;
        if let Err(e) = fs::remove_file(source) {
            let _ = fs::remove_file(destination);
            return Err(e);
        }
    }
    Ok(())
}

/// Remove folders left empty below `root` after a file was moved out.
fn remove_empty_parents(path: &Path, root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) || fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_below() {
        assert!(is_below("nes/mario.nes", ""));
        assert!(is_below("nes/mario.nes", "nes"));
        assert!(!is_below("nes2/mario.nes", "nes"));
        assert!(is_below("nes", "nes"));
    }

    #[test]
    fn test_transfer_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("sub/b.bin");
        fs::write(&a, b"one").unwrap();

        transfer(&a, &b, false).unwrap();
        assert!(a.exists() && b.exists());

        let err = transfer(&a, &b, true).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(a.exists(), "source must survive a refused move");

        fs::remove_file(&b).unwrap();
        transfer(&a, &b, true).unwrap();
        assert!(!a.exists());
        assert_eq!(fs::read(&b).unwrap(), b"one");
    }

    #[test]
    fn test_remove_empty_parents_stops_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        let nested = root.join("NES/M");
        fs::create_dir_all(&nested).unwrap();
        fs::write(root.join("keep.txt"), b"x").unwrap();

        remove_empty_parents(&nested.join("gone.nes"), &root);
        assert!(!root.join("NES").exists());
        assert!(root.exists());
    }
}
