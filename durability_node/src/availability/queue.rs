// Replication work queue
//
// Strict priority order: numeric priority descending, then enqueue order. A
// retried job keeps its sequence number and therefore its place in line.

use serde::Serialize;

use crate::types::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Pending repair of one under-replicated CID
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationJob {
    pub cid: String,
    /// 1 (low) to 4 (critical)
    pub priority: u8,
    pub attempts: u32,
    pub last_attempt_at: Option<u64>,
    pub status: JobStatus,
    pub enqueued_at: u64,
    #[serde(skip)]
    seq: u64,
}

/// What happened to a job after a failed attempt
#[derive(Debug)]
pub enum FailureOutcome {
    /// Back to pending for another attempt
    Retry { attempts: u32 },
    /// Attempts exhausted; the job has been removed
    Terminal(ReplicationJob),
}

/// Replication queue; at most one job per CID
#[derive(Debug, Default)]
pub struct ReplicationQueue {
    jobs: Vec<ReplicationJob>,
    next_seq: u64,
}

impl ReplicationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job unless one already exists for the CID. Returns true if added.
    pub fn enqueue(&mut self, cid: &str, priority: u8) -> bool {
        if self.jobs.iter().any(|j| j.cid == cid) {
            return false;
        }

        self.jobs.push(ReplicationJob {
            cid: cid.to_string(),
            priority,
            attempts: 0,
            last_attempt_at: None,
            status: JobStatus::Pending,
            enqueued_at: now_millis(),
            seq: self.next_seq,
        });
        self.next_seq += 1;
        true
    }

    /// Take the next pending job: marks it in progress and counts the attempt
    pub fn next_pending(&mut self) -> Option<ReplicationJob> {
        let job = self
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)))?;

        job.status = JobStatus::InProgress;
        job.attempts += 1;
        job.last_attempt_at = Some(now_millis());
        Some(job.clone())
    }

    /// Remove a finished job
    pub fn complete(&mut self, cid: &str) -> Option<ReplicationJob> {
        let index = self.jobs.iter().position(|j| j.cid == cid)?;
        let mut job = self.jobs.remove(index);
        job.status = JobStatus::Completed;
        Some(job)
    }

    /// Record a failed attempt; the job is removed once `attempts >= max_attempts`
    pub fn fail(&mut self, cid: &str, max_attempts: u32) -> Option<FailureOutcome> {
        let index = self.jobs.iter().position(|j| j.cid == cid)?;
        if self.jobs[index].attempts >= max_attempts {
            let mut job = self.jobs.remove(index);
            job.status = JobStatus::Failed;
            Some(FailureOutcome::Terminal(job))
        } else {
            let job = &mut self.jobs[index];
            job.status = JobStatus::Pending;
            Some(FailureOutcome::Retry {
                attempts: job.attempts,
            })
        }
    }

    /// Drop a job without running it
    pub fn remove(&mut self, cid: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.cid != cid);
        before != self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in the order they would run
    pub fn snapshot(&self) -> Vec<ReplicationJob> {
        let mut jobs = self.jobs.clone();
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        jobs
    }
}
