use super::walk::{self, DiscoveredItem, ItemKey};
use crate::archive;
use crate::catalog::{CatalogIndex, CatalogStore, RomHashes};
use crate::config::ScanConfig;
use crate::drives::DriveRegistry;
use crate::error::{Error, Result};
use crate::hasher::{self, FileHashes};
use crate::progress::{ProgressEvent, ScanProgress};
use crate::storage::models::{
    FileMatch, FileStatus, JobStatus, ScanCheckpoint, ScanJob, ScanPhase, ScannedFile,
};
use crate::storage::{now_rfc3339, Database};
use crate::verify;
use ahash::AHashMap;
use rayon::prelude::*;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const SIGNAL_RUN: u8 = 0;
const SIGNAL_PAUSE: u8 = 1;
const SIGNAL_CANCEL: u8 = 2;

/// Cooperative stop signal for one running job, checked between files and
/// between hash chunks.
#[derive(Debug, Default)]
pub struct JobControl {
    signal: AtomicU8,
    admin: Mutex<()>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the job to stop at the next check and keep its checkpoint.
    /// A pending cancel is not downgraded.
    pub fn request_pause(&self) {
        let _ = self.signal.compare_exchange(
            SIGNAL_RUN,
            SIGNAL_PAUSE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn request_cancel(&self) {
        self.signal.store(SIGNAL_CANCEL, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.signal.load(Ordering::SeqCst) != SIGNAL_RUN
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.load(Ordering::SeqCst) == SIGNAL_CANCEL
    }

    /// Serializes status transitions of this job.
    pub(crate) fn admin(&self) -> MutexGuard<'_, ()> {
        self.admin.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct ItemHashes {
    hashes: RomHashes,
    header_size: Option<i64>,
    headerless: Option<RomHashes>,
}

impl From<FileHashes> for ItemHashes {
    fn from(h: FileHashes) -> Self {
        Self {
            hashes: h.hashes,
            header_size: h.header.map(|header| header.size() as i64),
            headerless: h.headerless,
        }
    }
}

enum HashOutcome {
    Hashed(ItemHashes),
    Failed(String),
}

/// Runs one scan job to completion, pause, cancellation or failure.
pub struct ScanRunner {
    db: Arc<Database>,
    catalogs: Arc<CatalogStore>,
    drives: Arc<DriveRegistry>,
    config: ScanConfig,
}

impl ScanRunner {
    pub fn new(
        db: Arc<Database>,
        catalogs: Arc<CatalogStore>,
        drives: Arc<DriveRegistry>,
        config: ScanConfig,
    ) -> Self {
        Self {
            db,
            catalogs,
            drives,
            config: config.normalized(),
        }
    }

    /// Run `job_id` on the calling thread. Hashing fans out to a pool of
    /// `hash_workers` threads owned by this run.
    ///
    /// A job with a checkpoint continues after it. The returned status is the
    /// one persisted; only storage failures are returned as errors.
    pub fn run(
        &self,
        job_id: i64,
        control: &JobControl,
        emit: &dyn Fn(ProgressEvent),
    ) -> Result<JobStatus> {
        let job = self
            .db
            .get_scan_job(job_id)?
            .ok_or_else(|| Error::not_found(format!("scan job {}", job_id)))?;
        if job.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "scan job {} is already {}",
                job_id, job.status
            )));
        }

        let resume_count = if job.started_at.is_some() {
            self.db.increment_resume_count(job_id)?
        } else {
            job.resume_count
        };
        self.db
            .update_job_status(job_id, JobStatus::Running, ScanPhase::Discovering, None)?;
        info!(
            "Scan job {} started on drive {} (target '{}', resume #{})",
            job_id, job.drive_id, job.target_path, resume_count
        );
        emit(ProgressEvent::JobStarted {
            job_id,
            drive_id: job.drive_id,
            resume_count,
        });
        emit(ProgressEvent::PhaseChanged {
            job_id,
            phase: ScanPhase::Discovering,
        });

        let phase = Cell::new(ScanPhase::Discovering);
        let outcome = self.execute(&job, control, emit, &phase);

        let _admin = control.admin();
        let (status, message) = match outcome {
            Ok(checkpoint) => (
                JobStatus::Completed,
                Some(format!(
                    "{} files: {} verified, {} unknown, {} errors",
                    checkpoint.processed_files,
                    checkpoint.verified_files,
                    checkpoint.unknown_files,
                    checkpoint.error_files
                )),
            ),
            Err(Error::Cancelled) if control.is_cancelled() => {
                (JobStatus::Cancelled, Some("cancelled by user".to_string()))
            }
            Err(Error::Cancelled) => (JobStatus::Paused, None),
            Err(e) => {
                error!("Scan job {} failed: {}", job_id, e);
                (JobStatus::Failed, Some(e.to_string()))
            }
        };

        let final_phase = match status {
            JobStatus::Paused => phase.get(),
            _ => ScanPhase::Finished,
        };
        let stored_message = match status {
            JobStatus::Completed => None,
            _ => message.as_deref(),
        };
        self.db
            .update_job_status(job_id, status, final_phase, stored_message)?;
        if status == JobStatus::Completed {
            self.db.touch_drive_scanned(job.drive_id)?;
        }
        info!("Scan job {} finished: {}", job_id, status);
        emit(ProgressEvent::JobFinished {
            job_id,
            status,
            message,
        });
        Ok(status)
    }

    fn set_phase(
        &self,
        job_id: i64,
        next: ScanPhase,
        phase: &Cell<ScanPhase>,
        emit: &dyn Fn(ProgressEvent),
    ) -> Result<()> {
        if phase.get() != next {
            self.db.set_job_phase(job_id, next)?;
            phase.set(next);
            emit(ProgressEvent::PhaseChanged { job_id, phase: next });
        }
        Ok(())
    }

    fn execute(
        &self,
        job: &ScanJob,
        control: &JobControl,
        emit: &dyn Fn(ProgressEvent),
        phase: &Cell<ScanPhase>,
    ) -> Result<ScanCheckpoint> {
        let drive = self.drives.get(job.drive_id)?;
        let root = PathBuf::from(&drive.root_path);
        self.ensure_root_reachable(drive.id, &root)?;

        let stop = || control.should_stop();
        let discovery_start = Instant::now();
        let items = walk::discover(&root, &job.target_path, &self.config, &stop)?;
        let total_files = items.len() as i64;
        let total_bytes: i64 = items.iter().map(|i| i.size as i64).sum();
        self.db.set_job_totals(job.id, total_files, total_bytes)?;
        info!(
            "Job {} discovered {} items ({} bytes) in {:.2}s",
            job.id,
            total_files,
            total_bytes,
            discovery_start.elapsed().as_secs_f64()
        );

        let resume_from = ItemKey::from_checkpoint(
            job.last_processed_path.as_deref(),
            job.last_processed_entry.as_deref(),
        )?;
        let pending: Vec<&DiscoveredItem> = items
            .iter()
            .filter(|item| resume_from.as_ref().map_or(true, |key| item.key > *key))
            .collect();
        if let Some(key) = &resume_from {
            info!(
                "Job {} resuming after {} ({} of {} items left)",
                job.id,
                key.record_path(),
                pending.len(),
                items.len()
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.hash_workers)
            .thread_name(move |i| format!("hash-worker-{}", i))
            .build()
            .map_err(|e| Error::Other(format!("cannot start hash workers: {}", e)))?;

        let mut checkpoint = ScanCheckpoint::of(job);
        let run_start = Instant::now();
        let mut bytes_this_run: i64 = 0;

        for batch in pending.chunks(self.config.batch_size) {
            if control.should_stop() {
                return Err(Error::Cancelled);
            }

            self.set_phase(job.id, ScanPhase::Hashing, phase, emit)?;
            let existing = self.prefetch(drive.id, batch)?;
            let hashed: Vec<Result<HashOutcome>> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|item| {
                        let previous = existing.get(&item.key.record_path());
                        self.hash_item(item, previous, job.rehash, &stop)
                    })
                    .collect()
            });
            let mut completed: Vec<(&DiscoveredItem, HashOutcome)> = Vec::with_capacity(batch.len());
            for (item, outcome) in batch.iter().copied().zip(hashed) {
                match outcome {
                    Ok(o) => completed.push((item, o)),
                    // Keep the items hashed before the stop.
                    Err(Error::Cancelled) => break,
                    Err(e) => return Err(e),
                }
            }

            // A root that vanished mid-batch turns every item into an error.
            // Those records must not replace the stored ones.
            self.ensure_root_reachable(drive.id, &root)?;

            self.set_phase(job.id, ScanPhase::Verifying, phase, emit)?;
            let index = self.catalogs.index();
            let now = now_rfc3339();
            let mut records = Vec::with_capacity(completed.len());
            for (item, outcome) in &completed {
                let (file, matches) = build_record(job.id, drive.id, item, outcome, &index, &now);
                match file.status {
                    FileStatus::Verified | FileStatus::BadDump => checkpoint.verified_files += 1,
                    FileStatus::Unknown => checkpoint.unknown_files += 1,
                    FileStatus::Error | FileStatus::Pending => checkpoint.error_files += 1,
                }
                checkpoint.processed_files += 1;
                checkpoint.processed_bytes += item.size as i64;
                bytes_this_run += item.size as i64;
                records.push((file, matches));
            }

            let Some((last, _)) = completed.last() else {
                return Err(Error::Cancelled);
            };
            checkpoint.last_processed_path = Some(last.key.relative_path.clone());
            checkpoint.last_processed_entry = last.key.entry_json()?;

            self.set_phase(job.id, ScanPhase::Persisting, phase, emit)?;
            self.db.commit_scan_batch(job.id, &records, &checkpoint)?;

            let elapsed = run_start.elapsed().as_secs_f64();
            emit(ProgressEvent::Progress(ScanProgress {
                job_id: job.id,
                drive_id: drive.id,
                processed_files: checkpoint.processed_files,
                total_files,
                processed_bytes: checkpoint.processed_bytes,
                total_bytes,
                current_item: last.key.record_path(),
                bytes_per_sec: if elapsed > 0.0 {
                    bytes_this_run as f64 / elapsed
                } else {
                    0.0
                },
            }));

            if completed.len() < batch.len() {
                return Err(Error::Cancelled);
            }
        }

        Ok(checkpoint)
    }

    fn ensure_root_reachable(&self, drive_id: i64, root: &Path) -> Result<()> {
        if root.is_dir() {
            return Ok(());
        }
        warn!("Drive {} root {} is not reachable", drive_id, root.display());
        self.drives.mark_offline(drive_id)?;
        Err(Error::not_found(format!(
            "drive root {} is not reachable",
            root.display()
        )))
    }

    /// Stored records for the items of one batch, keyed by record path.
    fn prefetch(&self, drive_id: i64, batch: &[&DiscoveredItem]) -> Result<AHashMap<String, ScannedFile>> {
        let mut existing = AHashMap::with_capacity(batch.len());
        for item in batch {
            let path = item.key.record_path();
            if let Some(file) = self.db.get_scanned_file_by_path(drive_id, &path)? {
                existing.insert(path, file);
            }
        }
        Ok(existing)
    }

    /// Hash one item. Failures that belong to the item are recorded on it;
    /// cancellation and storage errors are returned.
    fn hash_item(
        &self,
        item: &DiscoveredItem,
        previous: Option<&ScannedFile>,
        rehash: bool,
        stop: &(dyn Fn() -> bool + Sync),
    ) -> Result<HashOutcome> {
        if let Some(err) = &item.error {
            return Ok(HashOutcome::Failed(err.clone()));
        }

        if !rehash {
            if let Some(prev) = previous {
                if prev.size == item.size as i64
                    && prev.modified_at == item.modified_at
                    && prev.hashes.sha1.is_some()
                {
                    debug!("Unchanged, reusing hashes: {}", prev.relative_path);
                    return Ok(HashOutcome::Hashed(ItemHashes {
                        hashes: prev.hashes.clone(),
                        header_size: prev.header_size,
                        headerless: prev.headerless_hashes.clone(),
                    }));
                }
            }
        }

        let chunk_size = self.config.hash_chunk_size;
        let result = if item.key.entry.is_empty() {
            hasher::hash_file(&item.disk_path, chunk_size, stop)
        } else {
            if self.config.quick_archive_scan && !rehash {
                if let Some(crc) = item.stored_crc {
                    return Ok(HashOutcome::Hashed(ItemHashes {
                        hashes: RomHashes::from_crc(crc),
                        header_size: None,
                        headerless: None,
                    }));
                }
            }
            let extension = item.extension();
            archive::open_member(&item.disk_path, &item.key.entry, |reader, size| {
                hasher::hash_reader(reader, extension, size, chunk_size, stop)
            })
        };

        match result {
            Ok(hashes) => Ok(HashOutcome::Hashed(hashes.into())),
            Err(e) if e.is_per_item() => {
                warn!("Failed to hash {}: {}", item.key.record_path(), e);
                Ok(HashOutcome::Failed(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

fn build_record(
    job_id: i64,
    drive_id: i64,
    item: &DiscoveredItem,
    outcome: &HashOutcome,
    index: &CatalogIndex,
    now: &str,
) -> (ScannedFile, Vec<FileMatch>) {
    let is_member = !item.key.entry.is_empty();
    let mut file = ScannedFile {
        id: 0,
        drive_id: Some(drive_id),
        relative_path: item.key.record_path(),
        file_name: item.file_name(),
        archive_path: is_member.then(|| item.key.relative_path.clone()),
        inner_path: is_member.then(|| item.key.entry.join("::")),
        size: item.size as i64,
        modified_at: item.modified_at,
        hashes: RomHashes::default(),
        header_size: None,
        headerless_hashes: None,
        is_online: true,
        status: FileStatus::Error,
        error_message: None,
        scan_job_id: Some(job_id),
        first_seen_at: now.to_string(),
        last_seen_at: now.to_string(),
        verified_at: None,
    };

    match outcome {
        HashOutcome::Hashed(h) => {
            let headerless = h
                .header_size
                .zip(h.headerless.as_ref())
                .map(|(size, stripped)| (size as u64, stripped));
            let result = verify::verify_hashes(index, item.size, &h.hashes, headerless);
            file.hashes = h.hashes.clone();
            file.header_size = h.header_size;
            file.headerless_hashes = h.headerless.clone();
            file.status = result.status;
            file.error_message = result.error;
            file.verified_at = Some(now.to_string());
            (file, result.matches)
        }
        HashOutcome::Failed(message) => {
            file.error_message = Some(message.clone());
            (file, Vec::new())
        }
    }
}
