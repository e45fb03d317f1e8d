use crate::storage::models::{JobStatus, ScanPhase};

/// Snapshot of a running scan job.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanProgress {
    pub job_id: i64,
    pub drive_id: i64,
    pub processed_files: i64,
    pub total_files: i64,
    pub processed_bytes: i64,
    pub total_bytes: i64,
    pub current_item: String,
    pub bytes_per_sec: f64,
}

/// Events emitted by scan workers. One aggregator forwards them, in order,
/// to a [`ProgressReporter`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    JobQueued {
        job_id: i64,
        drive_id: i64,
    },
    JobStarted {
        job_id: i64,
        drive_id: i64,
        resume_count: i64,
    },
    PhaseChanged {
        job_id: i64,
        phase: ScanPhase,
    },
    Progress(ScanProgress),
    JobFinished {
        job_id: i64,
        status: JobStatus,
        message: Option<String>,
    },
}

impl ProgressEvent {
    pub fn job_id(&self) -> i64 {
        match self {
            ProgressEvent::JobQueued { job_id, .. }
            | ProgressEvent::JobStarted { job_id, .. }
            | ProgressEvent::PhaseChanged { job_id, .. }
            | ProgressEvent::JobFinished { job_id, .. } => *job_id,
            ProgressEvent::Progress(p) => p.job_id,
        }
    }

    pub fn dispatch(&self, reporter: &dyn ProgressReporter) {
        match self {
            ProgressEvent::JobQueued { job_id, drive_id } => reporter.on_job_queued(*job_id, *drive_id),
            ProgressEvent::JobStarted {
                job_id,
                drive_id,
                resume_count,
            } => reporter.on_job_started(*job_id, *drive_id, *resume_count),
            ProgressEvent::PhaseChanged { job_id, phase } => reporter.on_phase_changed(*job_id, *phase),
            ProgressEvent::Progress(progress) => reporter.on_scan_progress(progress),
            ProgressEvent::JobFinished {
                job_id,
                status,
                message,
            } => reporter.on_job_finished(*job_id, *status, message.as_deref()),
        }
    }
}

/// Trait for reporting scan and organize progress.
///
/// CLI implements it with indicatif bars. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_job_queued(&self, _job_id: i64, _drive_id: i64) {}
    fn on_job_started(&self, _job_id: i64, _drive_id: i64, _resume_count: i64) {}
    fn on_phase_changed(&self, _job_id: i64, _phase: ScanPhase) {}
    fn on_scan_progress(&self, _progress: &ScanProgress) {}
    fn on_job_finished(&self, _job_id: i64, _status: JobStatus, _message: Option<&str>) {}
    fn on_organize_start(&self, _planned: usize) {}
    fn on_organize_progress(&self, _done: usize, _total: usize, _current: &str) {}
    fn on_organize_complete(&self, _succeeded: usize, _failed: usize, _skipped: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl ProgressReporter for Recorder {
        fn on_phase_changed(&self, job_id: i64, phase: ScanPhase) {
            self.seen.lock().unwrap().push(format!("{}:{}", job_id, phase));
        }

        fn on_job_finished(&self, job_id: i64, status: JobStatus, _message: Option<&str>) {
            self.seen.lock().unwrap().push(format!("{}:{}", job_id, status));
        }
    }

    #[test]
    fn test_dispatch_routes_to_reporter() {
        let recorder = Recorder::default();
        ProgressEvent::PhaseChanged {
            job_id: 3,
            phase: ScanPhase::Hashing,
        }
        .dispatch(&recorder);
        ProgressEvent::JobQueued { job_id: 3, drive_id: 1 }.dispatch(&recorder);
        ProgressEvent::JobFinished {
            job_id: 3,
            status: JobStatus::Completed,
            message: None,
        }
        .dispatch(&recorder);

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["3:hashing", "3:completed"]);
    }
}
