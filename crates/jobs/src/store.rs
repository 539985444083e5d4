use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub id: String,
    pub status: JobStatus,
    /// 0-100, only ever moves forward.
    pub progress: u8,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub workdir: PathBuf,
}

impl RenderJob {
    pub fn new(id: String, workdir: PathBuf) -> Self {
        Self {
            id,
            status: JobStatus::Processing,
            progress: 0,
            output_url: None,
            error: None,
            created_at: Utc::now(),
            workdir,
        }
    }
}

/// Where jobs live. The in-memory store below is the default; a persistent
/// implementation slots in behind the same trait.
///
/// Implementations must enforce two invariants: progress never decreases,
/// and a job in a terminal status never changes again.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: RenderJob);
    fn get(&self, id: &str) -> Option<RenderJob>;
    fn update_progress(&self, id: &str, progress: u8);
    fn mark_completed(&self, id: &str, output_url: String);
    fn mark_failed(&self, id: &str, error: String);
    fn remove(&self, id: &str) -> Option<RenderJob>;
    /// Remove and return every job created before `cutoff`, whatever its
    /// status.
    fn sweep_created_before(&self, cutoff: DateTime<Utc>) -> Vec<RenderJob>;
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, RenderJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: RenderJob) {
        self.jobs.write().insert(job.id.clone(), job);
    }

    fn get(&self, id: &str) -> Option<RenderJob> {
        self.jobs.read().get(id).cloned()
    }

    fn update_progress(&self, id: &str, progress: u8) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(id) {
            if !job.status.is_terminal() && progress > job.progress {
                job.progress = progress.min(100);
            }
        }
    }

    fn mark_completed(&self, id: &str, output_url: String) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.output_url = Some(output_url);
            }
        }
    }

    fn mark_failed(&self, id: &str, error: String) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Failed;
                job.error = Some(error);
            }
        }
    }

    fn remove(&self, id: &str) -> Option<RenderJob> {
        self.jobs.write().remove(id)
    }

    fn sweep_created_before(&self, cutoff: DateTime<Utc>) -> Vec<RenderJob> {
        let mut jobs = self.jobs.write();
        let stale: Vec<String> = jobs
            .values()
            .filter(|j| j.created_at < cutoff)
            .map(|j| j.id.clone())
            .collect();
        stale.into_iter().filter_map(|id| jobs.remove(&id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(id: &str) -> RenderJob {
        RenderJob::new(id.into(), PathBuf::from("/tmp/x"))
    }

    #[test]
    fn progress_is_monotone() {
        let store = MemoryJobStore::new();
        store.insert(job("a"));
        store.update_progress("a", 40);
        store.update_progress("a", 25);
        assert_eq!(store.get("a").unwrap().progress, 40);
        store.update_progress("a", 41);
        assert_eq!(store.get("a").unwrap().progress, 41);
    }

    #[test]
    fn terminal_status_is_immutable() {
        let store = MemoryJobStore::new();
        store.insert(job("a"));
        store.mark_completed("a", "/out/a.mp4".into());
        store.mark_failed("a", "too late".into());
        store.update_progress("a", 50);
        let j = store.get("a").unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.progress, 100);
        assert!(j.error.is_none());
    }

    #[test]
    fn failed_job_keeps_last_progress() {
        let store = MemoryJobStore::new();
        store.insert(job("a"));
        store.update_progress("a", 30);
        store.mark_failed("a", "ffmpeg exited".into());
        let j = store.get("a").unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.progress, 30);
        assert_eq!(j.error.as_deref(), Some("ffmpeg exited"));
    }

    #[test]
    fn sweep_removes_stale_jobs_in_any_state() {
        let store = MemoryJobStore::new();
        let mut old_done = job("old-done");
        old_done.created_at = Utc::now() - Duration::hours(25);
        let mut old_running = job("old-running");
        old_running.created_at = Utc::now() - Duration::hours(25);
        store.insert(old_done.clone());
        store.mark_completed("old-done", "/out.mp4".into());
        store.insert(old_running);
        store.insert(job("fresh"));

        let swept = store.sweep_created_before(Utc::now() - Duration::hours(24));
        let mut ids: Vec<_> = swept.iter().map(|j| j.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, ["old-done", "old-running"]);
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"processing\""
        );
    }
}
