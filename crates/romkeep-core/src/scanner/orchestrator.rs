use super::job::{JobControl, ScanRunner};
use super::queue::ScanQueue;
use crate::catalog::CatalogStore;
use crate::config::ScanConfig;
use crate::drives::DriveRegistry;
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::storage::models::{JobPriority, JobStatus, ScanJob, ScanPhase};
use crate::storage::Database;
use ahash::AHashMap;
use dashmap::DashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// What to scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    pub drive_id: i64,
    /// Directory below the drive root; the whole drive when `None`.
    pub sub_path: Option<String>,
    pub priority: JobPriority,
    /// Hash everything again, ignoring unchanged files and stored archive CRCs.
    pub rehash: bool,
}

struct SchedulerState {
    queue: ScanQueue,
    /// job id -> drive id
    running: AHashMap<i64, i64>,
    shutting_down: bool,
}

struct Shared {
    db: Arc<Database>,
    drives: Arc<DriveRegistry>,
    runner: ScanRunner,
    max_drives: usize,
    state: Mutex<SchedulerState>,
    changed: Condvar,
    controls: DashMap<i64, Arc<JobControl>>,
    events: Mutex<Option<Sender<ProgressEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = self.events.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = tx.send(event);
        }
    }

    fn event_sender(&self) -> Option<Sender<ProgressEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Schedules scan jobs across drives.
///
/// A coordinator thread starts at most `max_concurrent_drives` workers, never
/// two on the same drive. Each worker runs one job with its own pool of
/// hashing threads. Workers report through a channel to a single aggregator
/// thread that feeds the [`ProgressReporter`].
pub struct ScanOrchestrator {
    shared: Arc<Shared>,
    coordinator: Option<JoinHandle<()>>,
    aggregator: Option<JoinHandle<()>>,
}

impl ScanOrchestrator {
    pub fn new(
        db: Arc<Database>,
        catalogs: Arc<CatalogStore>,
        drives: Arc<DriveRegistry>,
        config: ScanConfig,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self> {
        let config = config.normalized();
        let (tx, rx) = mpsc::channel::<ProgressEvent>();
        let aggregator = thread::Builder::new()
            .name("scan-progress".to_string())
            .spawn(move || {
                for event in rx {
                    event.dispatch(reporter.as_ref());
                }
            })?;

        let shared = Arc::new(Shared {
            db: db.clone(),
            drives: drives.clone(),
            max_drives: config.max_concurrent_drives,
            state: Mutex::new(SchedulerState {
                queue: ScanQueue::new(config.prioritize_ssd),
                running: AHashMap::new(),
                shutting_down: false,
            }),
            runner: ScanRunner::new(db, catalogs, drives, config),
            changed: Condvar::new(),
            controls: DashMap::new(),
            events: Mutex::new(Some(tx)),
            workers: Mutex::new(Vec::new()),
        });

        let coordinator = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("scan-coordinator".to_string())
                .spawn(move || coordinate(shared))?
        };

        Ok(Self {
            shared,
            coordinator: Some(coordinator),
            aggregator: Some(aggregator),
        })
    }

    /// Queue a new scan job for a drive.
    pub fn enqueue(&self, request: ScanRequest) -> Result<ScanJob> {
        let drive = self.shared.drives.get(request.drive_id)?;
        if !drive.is_enabled {
            return Err(Error::invalid_state(format!("drive {} is disabled", drive.id)));
        }
        if !drive.is_online {
            return Err(Error::invalid_state(format!("drive {} is offline", drive.id)));
        }
        let target_path = normalize_sub_path(request.sub_path.as_deref())?;

        let mut state = self.shared.lock_state();
        if state.shutting_down {
            return Err(Error::invalid_state("scanner is shutting down"));
        }
        let mut job = ScanJob {
            id: 0,
            drive_id: drive.id,
            target_path,
            priority: request.priority,
            status: JobStatus::Pending,
            phase: ScanPhase::Queued,
            rehash: request.rehash,
            total_files: 0,
            processed_files: 0,
            verified_files: 0,
            unknown_files: 0,
            error_files: 0,
            total_bytes: 0,
            processed_bytes: 0,
            last_processed_path: None,
            last_processed_entry: None,
            resume_count: 0,
            error_message: None,
            created_at: String::new(),
            started_at: None,
            completed_at: None,
            updated_at: String::new(),
        };
        job.id = self.shared.db.insert_scan_job(&job)?;
        state.queue.push(job.id, drive.id, job.priority, drive.is_ssd);
        drop(state);

        info!(
            "Queued scan job {} for drive {} '{}' ({} priority)",
            job.id, drive.id, drive.label, job.priority
        );
        self.shared.emit(ProgressEvent::JobQueued {
            job_id: job.id,
            drive_id: drive.id,
        });
        self.shared.changed.notify_all();
        self.job(job.id)
    }

    pub fn job(&self, job_id: i64) -> Result<ScanJob> {
        self.shared
            .db
            .get_scan_job(job_id)?
            .ok_or_else(|| Error::not_found(format!("scan job {}", job_id)))
    }

    pub fn jobs(&self) -> Result<Vec<ScanJob>> {
        Ok(self.shared.db.list_scan_jobs()?)
    }

    /// Queued or running in this process.
    pub fn is_active(&self, job_id: i64) -> bool {
        let state = self.shared.lock_state();
        state.queue.contains(job_id) || state.running.contains_key(&job_id)
    }

    /// Stop a running job at the next file or hash chunk, keeping its checkpoint.
    pub fn pause(&self, job_id: i64) -> Result<()> {
        let control = self
            .shared
            .controls
            .get(&job_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| Error::invalid_state(format!("scan job {} is not running", job_id)))?;
        let _admin = control.admin();
        let job = self.job(job_id)?;
        if job.status != JobStatus::Running {
            return Err(Error::invalid_state(format!(
                "scan job {} is {}, not running",
                job_id, job.status
            )));
        }
        control.request_pause();
        info!("Pause requested for scan job {}", job_id);
        Ok(())
    }

    /// Queue a paused or failed job again. It continues after its checkpoint.
    pub fn resume(&self, job_id: i64) -> Result<ScanJob> {
        let job = self.job(job_id)?;
        if !job.status.is_resumable() {
            return Err(Error::invalid_state(format!(
                "scan job {} is {} and cannot be resumed",
                job_id, job.status
            )));
        }
        let drive = self.shared.drives.get(job.drive_id)?;
        if !drive.is_online {
            return Err(Error::invalid_state(format!(
                "drive {} is offline, refresh it before resuming",
                drive.id
            )));
        }

        let mut state = self.shared.lock_state();
        if state.shutting_down {
            return Err(Error::invalid_state("scanner is shutting down"));
        }
        if state.queue.contains(job_id) || state.running.contains_key(&job_id) {
            return Err(Error::invalid_state(format!("scan job {} is already active", job_id)));
        }
        self.shared
            .db
            .update_job_status(job_id, JobStatus::Pending, ScanPhase::Queued, None)?;
        state.queue.push(job_id, job.drive_id, job.priority, drive.is_ssd);
        drop(state);

        info!("Resuming scan job {} after {:?}", job_id, job.last_processed_path);
        self.shared.emit(ProgressEvent::JobQueued {
            job_id,
            drive_id: job.drive_id,
        });
        self.shared.changed.notify_all();
        self.job(job_id)
    }

    /// Cancel a job in any non-terminal state. Counters are kept.
    pub fn cancel(&self, job_id: i64) -> Result<()> {
        let mut state = self.shared.lock_state();
        if state.running.contains_key(&job_id) {
            drop(state);
            if let Some(control) = self.shared.controls.get(&job_id).map(|c| c.value().clone()) {
                let _admin = control.admin();
                let job = self.job(job_id)?;
                if job.status.is_terminal() {
                    return Err(Error::invalid_state(format!(
                        "scan job {} is already {}",
                        job_id, job.status
                    )));
                }
                control.request_cancel();
                info!("Cancel requested for scan job {}", job_id);
                return Ok(());
            }
            // The worker finished between the two checks.
            state = self.shared.lock_state();
        }

        let job = self.job(job_id)?;
        if job.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "scan job {} is already {}",
                job_id, job.status
            )));
        }
        state.queue.remove(job_id);
        self.shared.db.update_job_status(
            job_id,
            JobStatus::Cancelled,
            ScanPhase::Finished,
            Some("cancelled by user"),
        )?;
        drop(state);

        info!("Cancelled scan job {}", job_id);
        self.shared.emit(ProgressEvent::JobFinished {
            job_id,
            status: JobStatus::Cancelled,
            message: Some("cancelled by user".to_string()),
        });
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Pick up jobs left behind by a previous process. Jobs that were running
    /// become paused; pending jobs are queued again. Returns the number queued.
    pub fn recover(&self) -> Result<usize> {
        let db = &self.shared.db;
        for job in db.jobs_with_status(JobStatus::Running)? {
            warn!("Scan job {} was interrupted, marking paused", job.id);
            db.update_job_status(job.id, JobStatus::Paused, job.phase, Some("interrupted"))?;
        }

        let mut queued = 0;
        let mut state = self.shared.lock_state();
        for job in db.jobs_with_status(JobStatus::Pending)? {
            if state.queue.contains(job.id) || state.running.contains_key(&job.id) {
                continue;
            }
            let is_ssd = self
                .shared
                .drives
                .get(job.drive_id)
                .map_or(false, |d| d.is_ssd);
            state.queue.push(job.id, job.drive_id, job.priority, is_ssd);
            queued += 1;
        }
        drop(state);

        if queued > 0 {
            info!("Re-queued {} pending scan jobs", queued);
            self.shared.changed.notify_all();
        }
        Ok(queued)
    }

    /// Block until nothing is queued or running.
    pub fn wait_idle(&self) {
        let mut state = self.shared.lock_state();
        while !state.shutting_down && (!state.queue.is_empty() || !state.running.is_empty()) {
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Pause every running job and join all threads. Queued jobs stay pending
    /// for [`ScanOrchestrator::recover`].
    pub fn shutdown(&mut self) {
        let Some(coordinator) = self.coordinator.take() else {
            return;
        };
        self.shared.lock_state().shutting_down = true;
        for control in self.shared.controls.iter() {
            control.value().request_pause();
        }
        self.shared.changed.notify_all();

        if coordinator.join().is_err() {
            error!("Scan coordinator panicked");
        }
        let workers: Vec<_> = self
            .shared
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                error!("Scan worker panicked");
            }
        }

        self.shared
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(aggregator) = self.aggregator.take() {
            let _ = aggregator.join();
        }
        info!("Scanner stopped");
    }
}

impl Drop for ScanOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn coordinate(shared: Arc<Shared>) {
    let mut state = shared.lock_state();
    loop {
        if state.shutting_down {
            break;
        }
        while state.running.len() < shared.max_drives {
            let SchedulerState { queue, running, .. } = &mut *state;
            let Some(next) = queue.pop_ready(|drive_id| running.values().any(|d| *d == drive_id))
            else {
                break;
            };
            start_worker(&shared, &mut state, next.job_id, next.drive_id);
        }
        state = shared
            .changed
            .wait(state)
            .unwrap_or_else(|e| e.into_inner());
    }
    debug!("Scan coordinator exiting");
}

fn start_worker(shared: &Arc<Shared>, state: &mut SchedulerState, job_id: i64, drive_id: i64) {
    let Some(events) = shared.event_sender() else {
        return;
    };
    let control = Arc::new(JobControl::new());
    shared.controls.insert(job_id, control.clone());
    state.running.insert(job_id, drive_id);

    let worker_shared = shared.clone();
    let spawned = thread::Builder::new()
        .name(format!("scan-job-{}", job_id))
        .spawn(move || run_worker(worker_shared, job_id, control, events));
    match spawned {
        Ok(handle) => {
            let mut workers = shared.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.retain(|w| !w.is_finished());
            workers.push(handle);
        }
        Err(e) => {
            error!("Could not start worker for scan job {}: {}", job_id, e);
            shared.controls.remove(&job_id);
            state.running.remove(&job_id);
            let message = format!("could not start worker: {}", e);
            if let Err(e) = shared.db.update_job_status(
                job_id,
                JobStatus::Failed,
                ScanPhase::Finished,
                Some(&message),
            ) {
                error!("Failed to record failure of scan job {}: {}", job_id, e);
            }
        }
    }
}

fn run_worker(
    shared: Arc<Shared>,
    job_id: i64,
    control: Arc<JobControl>,
    events: Sender<ProgressEvent>,
) {
    let emit = |event: ProgressEvent| {
        let _ = events.send(event);
    };
    match shared.runner.run(job_id, &control, &emit) {
        Ok(status) => debug!("Worker for scan job {} done: {}", job_id, status),
        Err(e) => error!("Scan job {} could not be recorded: {}", job_id, e),
    }

    shared.controls.remove(&job_id);
    shared.lock_state().running.remove(&job_id);
    shared.changed.notify_all();
}

/// Slash-separated path below a drive root, without leading or trailing
/// separators. Parent references are rejected.
fn normalize_sub_path(sub_path: Option<&str>) -> Result<String> {
    let Some(raw) = sub_path else {
        return Ok(String::new());
    };
    let parts: Vec<&str> = raw
        .split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.iter().any(|p| *p == "..") {
        return Err(Error::validation(format!(
            "scan path '{}' must stay inside the drive",
            raw
        )));
    }
    Ok(parts.join("/"))
}
