//! Job tracking for background analyses.
//!
//! Jobs hold a status, progress logs and a JSON result. Each job belongs to a
//! slot (one per caller-visible workspace, e.g. "stats" or "trends"); starting
//! a job in a slot cancels whatever job was running there. Finished jobs are
//! dropped once older than the retention period, swept on job creation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A single log entry with timestamp and message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    /// Stopped on a single-date request; the result lists candidate dates.
    NeedsInput,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        self != JobStatus::Running
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Job {
    pub job_id: String,
    pub slot: String,
    pub status: JobStatus,
    pub logs: Vec<LogEntry>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result: Option<serde_json::Value>,
}

/// Handle returned to the task running a job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    tokens: HashMap<String, CancellationToken>,
    /// slot → job id currently owning it
    slots: HashMap<String, String>,
}

/// How long finished jobs stay queryable by default.
pub const DEFAULT_RETENTION_MINUTES: i64 = 60;

/// In-memory job tracker.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<RwLock<Inner>>,
    retention: Option<chrono::Duration>,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::with_retention_minutes(DEFAULT_RETENTION_MINUTES)
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that forgets finished jobs `minutes` after they finished.
    /// An out-of-range value keeps finished jobs forever.
    pub fn with_retention_minutes(minutes: i64) -> Self {
        Self {
            inner: Arc::default(),
            retention: chrono::Duration::try_minutes(minutes),
        }
    }

    /// Create a running job in `slot`, cancelling the slot's previous job.
    pub fn create_job(&self, slot: &str) -> JobHandle {
        let job_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let job = Job {
            job_id: job_id.clone(),
            slot: slot.to_string(),
            status: JobStatus::Running,
            logs: vec![],
            created_at: chrono::Utc::now(),
            completed_at: None,
            result: None,
        };

        let mut inner = self.inner.write();
        if let Some(cutoff) = self
            .retention
            .and_then(|retention| chrono::Utc::now().checked_sub_signed(retention))
        {
            Self::purge_locked(&mut inner, cutoff);
        }
        if let Some(previous) = inner.slots.insert(slot.to_string(), job_id.clone()) {
            log::info!("Job {} superseded in slot '{}'", previous, slot);
            Self::cancel_locked(&mut inner, &previous, "Superseded by a newer request");
        }
        inner.jobs.insert(job_id.clone(), job);
        inner.tokens.insert(job_id.clone(), cancel.clone());
        JobHandle { job_id, cancel }
    }

    pub fn log(&self, job_id: &str, level: LogLevel, message: impl Into<String>) {
        let mut inner = self.inner.write();
        if let Some(job) = inner.jobs.get_mut(job_id) {
            job.logs.push(LogEntry {
                timestamp: chrono::Utc::now(),
                level,
                message: message.into(),
            });
        }
    }

    pub fn complete_job(&self, job_id: &str, result: Option<serde_json::Value>) {
        self.finish(job_id, JobStatus::Completed, result, None);
    }

    /// Park a job waiting for the caller to pick one of the offered dates.
    pub fn request_input(&self, job_id: &str, result: serde_json::Value) {
        self.finish(
            job_id,
            JobStatus::NeedsInput,
            Some(result),
            Some((LogLevel::Warning, "No clear image on the selected date".to_string())),
        );
    }

    pub fn fail_job(&self, job_id: &str, error_message: impl Into<String>) {
        self.finish(
            job_id,
            JobStatus::Failed,
            None,
            Some((LogLevel::Error, error_message.into())),
        );
    }

    /// Cancel a running job. Returns `false` for unknown or finished jobs.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let mut inner = self.inner.write();
        Self::cancel_locked(&mut inner, job_id, "Cancelled by request")
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.inner.read().jobs.get(job_id).cloned()
    }

    pub fn get_logs(&self, job_id: &str) -> Vec<LogEntry> {
        self.inner
            .read()
            .jobs
            .get(job_id)
            .map(|job| job.logs.clone())
            .unwrap_or_default()
    }

    /// Drop jobs that finished before `cutoff`. Returns how many were removed.
    pub fn purge_finished_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        Self::purge_locked(&mut self.inner.write(), cutoff)
    }

    pub fn job_count(&self) -> usize {
        self.inner.read().jobs.len()
    }

    fn purge_locked(inner: &mut Inner, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|_, job| !job.completed_at.is_some_and(|done| done < cutoff));
        let Inner { jobs, slots, .. } = &mut *inner;
        slots.retain(|_, job_id| jobs.contains_key(job_id));
        let removed = before - inner.jobs.len();
        if removed > 0 {
            log::debug!("Dropped {} finished jobs", removed);
        }
        removed
    }

    /// Terminal transitions are ignored once a job has finished, so a task
    /// completing after cancellation cannot resurrect its job.
    fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        entry: Option<(LogLevel, String)>,
    ) {
        let mut inner = self.inner.write();
        let Some(job) = inner.jobs.get_mut(job_id) else {
            return;
        };
        if job.status.is_finished() {
            return;
        }
        let now = chrono::Utc::now();
        job.status = status;
        job.completed_at = Some(now);
        job.result = result;
        if let Some((level, message)) = entry {
            job.logs.push(LogEntry {
                timestamp: now,
                level,
                message,
            });
        }
        inner.tokens.remove(job_id);
    }

    fn cancel_locked(inner: &mut Inner, job_id: &str, reason: &str) -> bool {
        let Some(job) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        if job.status.is_finished() {
            return false;
        }
        let now = chrono::Utc::now();
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(now);
        job.logs.push(LogEntry {
            timestamp: now,
            level: LogLevel::Warning,
            message: reason.to_string(),
        });
        if let Some(token) = inner.tokens.remove(job_id) {
            token.cancel();
        }
        true
    }
}

/// Progress sink for one job. Messages also go to the `log` facade; a
/// detached sink only logs.
#[derive(Clone)]
pub struct JobLog {
    tracker: Option<JobTracker>,
    job_id: String,
}

impl JobLog {
    pub fn new(tracker: &JobTracker, job_id: &str) -> Self {
        Self {
            tracker: Some(tracker.clone()),
            job_id: job_id.to_string(),
        }
    }

    pub fn detached() -> Self {
        Self {
            tracker: None,
            job_id: String::new(),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(LogLevel::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(LogLevel::Warning, message.into());
    }

    fn push(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Warning | LogLevel::Error => log::warn!("{}", message),
            _ => log::info!("{}", message),
        }
        if let Some(tracker) = &self.tracker {
            tracker.log(&self.job_id, level, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let tracker = JobTracker::new();
        let handle = tracker.create_job("stats");
        tracker.log(&handle.job_id, LogLevel::Info, "Calculating statistics...");
        tracker.complete_job(&handle.job_id, Some(serde_json::json!({"ok": true})));

        let job = tracker.get_job(&handle.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert_eq!(tracker.get_logs(&handle.job_id).len(), 1);
        assert!(!handle.cancel.is_cancelled());
    }

    #[test]
    fn test_new_job_supersedes_slot() {
        let tracker = JobTracker::new();
        let first = tracker.create_job("stats");
        let other_slot = tracker.create_job("trends");
        let second = tracker.create_job("stats");

        assert!(first.cancel.is_cancelled());
        assert_eq!(tracker.get_job(&first.job_id).unwrap().status, JobStatus::Cancelled);
        assert!(!other_slot.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());

        // a late completion does not override the cancellation
        tracker.complete_job(&first.job_id, None);
        assert_eq!(tracker.get_job(&first.job_id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_cancel_and_input() {
        let tracker = JobTracker::new();
        let handle = tracker.create_job("stats");
        tracker.request_input(&handle.job_id, serde_json::json!([]));
        assert_eq!(tracker.get_job(&handle.job_id).unwrap().status, JobStatus::NeedsInput);
        assert!(!tracker.cancel_job(&handle.job_id));

        let handle = tracker.create_job("stats");
        assert!(tracker.cancel_job(&handle.job_id));
        assert!(handle.cancel.is_cancelled());
        assert!(!tracker.cancel_job("missing"));
    }

    #[test]
    fn test_finished_jobs_are_purged_after_retention() {
        let tracker = JobTracker::new();
        let done = tracker.create_job("stats");
        tracker.complete_job(&done.job_id, None);
        let running = tracker.create_job("trends");

        assert_eq!(tracker.purge_finished_before(chrono::Utc::now() - chrono::Duration::minutes(5)), 0);
        assert_eq!(tracker.purge_finished_before(chrono::Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(tracker.get_job(&done.job_id).is_none());
        assert!(tracker.get_job(&running.job_id).is_some());
        assert_eq!(tracker.job_count(), 1);
    }

    #[test]
    fn test_creation_sweeps_expired_jobs() {
        let tracker = JobTracker::with_retention_minutes(0);
        for _ in 0..5 {
            let handle = tracker.create_job("stats");
            tracker.fail_job(&handle.job_id, "boom");
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
        let live = tracker.create_job("stats");
        assert_eq!(tracker.job_count(), 1);
        assert!(tracker.get_job(&live.job_id).is_some());

        // an oversized retention never expires anything
        let keep = JobTracker::with_retention_minutes(i64::MAX);
        let handle = keep.create_job("stats");
        keep.complete_job(&handle.job_id, None);
        keep.create_job("stats");
        assert_eq!(keep.job_count(), 2);
    }

    #[test]
    fn test_job_log_records_levels() {
        let tracker = JobTracker::new();
        let handle = tracker.create_job("stats");
        let progress = JobLog::new(&tracker, &handle.job_id);
        progress.info("Checking license...");
        progress.success("Statistics ready");
        JobLog::detached().warning("not recorded anywhere");

        let levels: Vec<LogLevel> = tracker
            .get_logs(&handle.job_id)
            .iter()
            .map(|e| e.level)
            .collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Success]);
    }
}
