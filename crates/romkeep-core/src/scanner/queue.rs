use crate::storage::models::JobPriority;
use std::cmp::Reverse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job_id: i64,
    pub drive_id: i64,
    pub priority: JobPriority,
    pub is_ssd: bool,
    seq: u64,
}

/// Jobs waiting for a drive worker.
///
/// Picks by priority, then (optionally) SSD before spinning disk, then FIFO.
/// Jobs whose drive already has an active scan are passed over.
#[derive(Debug, Default)]
pub struct ScanQueue {
    items: Vec<QueuedJob>,
    next_seq: u64,
    prioritize_ssd: bool,
}

impl ScanQueue {
    pub fn new(prioritize_ssd: bool) -> Self {
        Self {
            items: Vec::new(),
            next_seq: 0,
            prioritize_ssd,
        }
    }

    pub fn push(&mut self, job_id: i64, drive_id: i64, priority: JobPriority, is_ssd: bool) {
        self.items.push(QueuedJob {
            job_id,
            drive_id,
            priority,
            is_ssd,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    pub fn remove(&mut self, job_id: i64) -> bool {
        let before = self.items.len();
        self.items.retain(|j| j.job_id != job_id);
        self.items.len() != before
    }

    pub fn contains(&self, job_id: i64) -> bool {
        self.items.iter().any(|j| j.job_id == job_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn rank(&self, job: &QueuedJob) -> (JobPriority, bool, Reverse<u64>) {
        (job.priority, self.prioritize_ssd && job.is_ssd, Reverse(job.seq))
    }

    /// Remove and return the best job whose drive is not busy.
    pub fn pop_ready(&mut self, is_busy: impl Fn(i64) -> bool) -> Option<QueuedJob> {
        let pos = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, job)| !is_busy(job.drive_id))
            .max_by_key(|(_, job)| self.rank(job))
            .map(|(i, _)| i)?;
        Some(self.items.remove(pos))
    }
}
