use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use romkeep_core::progress::{ProgressReporter, ScanProgress};
use romkeep_core::storage::models::{JobStatus, ScanPhase};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan jobs: one line per job, a spinner while discovering and a bar
///   once the total is known. Jobs on different drives run side by side.
/// - Organize: a single bar over the planned files.
pub struct CliReporter {
    multi: MultiProgress,
    jobs: Mutex<HashMap<i64, ProgressBar>>,
    organize: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            jobs: Mutex::new(HashMap::new()),
            organize: Mutex::new(None),
        }
    }

    fn spinner(&self, message: String) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars(TICK_CHARS),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn with_job(&self, job_id: i64, f: impl FnOnce(&ProgressBar)) {
        let guard = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pb) = guard.get(&job_id) {
            f(pb);
        }
    }
}

fn hashing_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "  {spinner:.cyan} {prefix} [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining) {msg}",
    )
    .unwrap()
    .progress_chars("━╸─")
    .tick_chars(TICK_CHARS)
}

impl ProgressReporter for CliReporter {
    fn on_job_queued(&self, job_id: i64, drive_id: i64) {
        let pb = self.spinner(format!("Job {} queued for drive {}", job_id, drive_id));
        pb.set_prefix(format!("Job {}", job_id));
        let mut guard = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = guard.insert(job_id, pb) {
            old.finish_and_clear();
        }
    }

    fn on_job_started(&self, job_id: i64, drive_id: i64, resume_count: i64) {
        self.with_job(job_id, |pb| {
            if resume_count > 0 {
                pb.set_message(format!(
                    "Job {} resuming on drive {} (attempt {})",
                    job_id,
                    drive_id,
                    resume_count + 1
                ));
            } else {
                pb.set_message(format!("Job {} scanning drive {}", job_id, drive_id));
            }
        });
    }

    fn on_phase_changed(&self, job_id: i64, phase: ScanPhase) {
        self.with_job(job_id, |pb| {
            if phase == ScanPhase::Hashing {
                pb.set_style(hashing_style());
            }
            pb.set_message(format!("{}", phase));
        });
    }

    fn on_scan_progress(&self, progress: &ScanProgress) {
        self.with_job(progress.job_id, |pb| {
            pb.set_length(progress.total_files.max(0) as u64);
            pb.set_position(progress.processed_files.max(0) as u64);
            pb.set_message(format!("{}/s", HumanBytes(progress.bytes_per_sec as u64)));
        });
    }

    fn on_job_finished(&self, job_id: i64, status: JobStatus, message: Option<&str>) {
        let pb = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        let detail = message.map(|m| format!(": {}", m)).unwrap_or_default();
        let line = match status {
            JobStatus::Completed => format!("  \x1b[32m✓\x1b[0m Job {} completed{}", job_id, detail),
            JobStatus::Paused | JobStatus::Cancelled => {
                format!("  \x1b[33m•\x1b[0m Job {} {}{}", job_id, status, detail)
            }
            _ => format!("  \x1b[31m✗\x1b[0m Job {} {}{}", job_id, status, detail),
        };
        let _ = self.multi.println(line);
    }

    fn on_organize_start(&self, planned: usize) {
        let pb = self.multi.add(ProgressBar::new(planned as u64));
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Organizing [{bar:30.cyan/dim}] {pos}/{len} files {wide_msg}",
            )
            .unwrap()
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        let mut guard = self.organize.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = guard.replace(pb) {
            old.finish_and_clear();
        }
    }

    fn on_organize_progress(&self, done: usize, total: usize, current: &str) {
        let guard = self.organize.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pb) = guard.as_ref() {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
            pb.set_message(current.to_string());
        }
    }

    fn on_organize_complete(&self, succeeded: usize, failed: usize, skipped: usize, duration_secs: f64) {
        if let Some(pb) = self.organize.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pb.finish_and_clear();
        }
        eprintln!(
            "  \x1b[32m✓\x1b[0m Organize complete: {} done, {} failed, {} skipped in {:.2}s",
            succeeded, failed, skipped, duration_secs
        );
    }
}
