use crate::catalog::index::IndexHit;
use crate::catalog::{CatalogIndex, CatalogStore, RomHashes, RomStatus};
use crate::error::Result;
use crate::storage::models::{FileMatch, FileStatus, ScannedFile};
use crate::storage::Database;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const NO_HASHES_MESSAGE: &str = "no hashes computed";

/// Outcome of matching one file against every imported catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub status: FileStatus,
    pub matches: Vec<FileMatch>,
    pub error: Option<String>,
}

impl Verification {
    fn error(message: &str) -> Self {
        Self {
            status: FileStatus::Error,
            matches: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

fn to_match(hit: &IndexHit<'_>, headerless: bool) -> FileMatch {
    FileMatch {
        id: 0,
        file_id: 0,
        catalog_id: hit.rom.catalog_id,
        game_id: hit.rom.game_id,
        rom_id: hit.rom.rom_id,
        match_type: hit.kind,
        headerless,
        rom_status: hit.rom.status,
        catalog_name: hit.rom.catalog_name.to_string(),
        game_name: hit.rom.game_name.clone(),
        rom_name: hit.rom.rom_name.clone(),
    }
}

/// Status for a non-empty set of matches: bad only when every match is a bad dump.
pub fn status_for(matches: &[FileMatch]) -> FileStatus {
    if matches.is_empty() {
        FileStatus::Unknown
    } else if matches.iter().all(|m| m.rom_status == RomStatus::BadDump) {
        FileStatus::BadDump
    } else {
        FileStatus::Verified
    }
}

/// Match a file's hashes against the index.
///
/// Full-file hashes are tried first. When they match nothing and a known
/// header was stripped, the headerless hashes (over `size - header_size`
/// bytes) are tried next.
pub fn verify_hashes(
    index: &CatalogIndex,
    size: u64,
    hashes: &RomHashes,
    headerless: Option<(u64, &RomHashes)>,
) -> Verification {
    if hashes.is_empty() {
        return Verification::error(NO_HASHES_MESSAGE);
    }

    let mut matches: Vec<FileMatch> = index
        .lookup(size, hashes)
        .iter()
        .map(|hit| to_match(hit, false))
        .collect();

    if matches.is_empty() {
        if let Some((header_size, stripped)) = headerless {
            if !stripped.is_empty() && size > header_size {
                matches = index
                    .lookup(size - header_size, stripped)
                    .iter()
                    .map(|hit| to_match(hit, true))
                    .collect();
            }
        }
    }

    Verification {
        status: status_for(&matches),
        matches,
        error: None,
    }
}

pub fn verify_file(index: &CatalogIndex, file: &ScannedFile) -> Verification {
    let headerless = match (file.header_size, file.headerless_hashes.as_ref()) {
        (Some(header), Some(stripped)) => Some((header as u64, stripped)),
        _ => None,
    };
    verify_hashes(index, file.size.max(0) as u64, &file.hashes, headerless)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReverifyReport {
    pub files: usize,
    pub verified: usize,
    pub bad_dumps: usize,
    pub unknown: usize,
    pub errors: usize,
    pub changed: usize,
}

/// Re-runs verification against the current catalogs without touching disk.
pub struct Verifier {
    db: Arc<Database>,
    catalogs: Arc<CatalogStore>,
}

impl Verifier {
    pub fn new(db: Arc<Database>, catalogs: Arc<CatalogStore>) -> Self {
        Self { db, catalogs }
    }

    pub fn verify(&self, file: &ScannedFile) -> Verification {
        verify_file(&self.catalogs.index(), file)
    }

    /// Verify every file that was hashed. Files still pending or failed on read
    /// keep their status.
    pub fn reverify_all(&self) -> Result<ReverifyReport> {
        let start = Instant::now();
        let index = self.catalogs.index();
        let mut report = ReverifyReport::default();

        for file in self.db.list_scanned_files(None)? {
            if file.hashes.is_empty() {
                continue;
            }
            let result = verify_file(&index, &file);
            let previous: Vec<i64> = self.db.matches_for_file(file.id)?.iter().map(|m| m.rom_id).collect();
            let current: Vec<i64> = result.matches.iter().map(|m| m.rom_id).collect();
            if result.status != file.status || previous != current {
                report.changed += 1;
            }
            self.db.update_file_verification(
                file.id,
                result.status,
                result.error.as_deref(),
                &result.matches,
            )?;

            report.files += 1;
            match result.status {
                FileStatus::Verified => report.verified += 1,
                FileStatus::BadDump => report.bad_dumps += 1,
                FileStatus::Unknown => report.unknown += 1,
                _ => report.errors += 1,
            }
            debug!("Re-verified {} -> {}", file.relative_path, result.status);
        }

        info!(
            "Re-verified {} files in {:.2}s: {} verified, {} bad dumps, {} unknown, {} changed",
            report.files,
            start.elapsed().as_secs_f64(),
            report.verified,
            report.bad_dumps,
            report.unknown,
            report.changed
        );
        Ok(report)
    }
}
