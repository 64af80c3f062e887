use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::ErrorKind;

pub type JobId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Snapshot of one job as seen by readers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    /// Frames written over total frames, in [0, 1]. Never decreases.
    pub progress: f32,
    pub error: Option<JobFailure>,
    pub output_path: Option<PathBuf>,
}

impl Job {
    pub fn queued(id: JobId) -> Self {
        Self {
            id,
            state: JobState::Queued,
            progress: 0.0,
            error: None,
            output_path: None,
        }
    }

    /// Queued to Processing. Any other transition is ignored.
    pub fn start(&mut self) -> bool {
        self.advance(JobState::Queued, JobState::Processing)
    }

    pub fn set_progress(&mut self, progress: f32) {
        if self.state == JobState::Processing && progress.is_finite() {
            self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        }
    }

    pub fn complete(&mut self, output: PathBuf) -> bool {
        if !self.advance(JobState::Processing, JobState::Completed) {
            return false;
        }
        self.progress = 1.0;
        self.output_path = Some(output);
        true
    }

    /// Fails a job that has not finished yet, from either live state.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = JobState::Failed;
        self.error = Some(JobFailure {
            kind,
            message: message.into(),
        });
        true
    }

    fn advance(&mut self, from: JobState, to: JobState) -> bool {
        if self.state != from {
            log::warn!("job {}: ignoring {:?} -> {:?} from {:?}", self.id, from, to, self.state);
            return false;
        }
        self.state = to;
        true
    }
}

/// Registry of jobs. Writers are the job workers; everything else reads.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job);

    fn get(&self, id: JobId) -> Option<Job>;

    /// Applies `f` under the store's lock. Returns false for unknown ids.
    fn update(&self, id: JobId, f: &mut dyn FnMut(&mut Job)) -> bool;

    /// Drops a job. Retention is the caller's responsibility.
    fn remove(&self, id: JobId) -> Option<Job>;

    fn ids(&self) -> Vec<JobId>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id, job);
    }

    fn get(&self, id: JobId) -> Option<Job> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id).cloned()
    }

    fn update(&self, id: JobId, f: &mut dyn FnMut(&mut Job)) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: JobId) -> Option<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.remove(&id)
    }

    fn ids(&self) -> Vec<JobId> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<JobId> = jobs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_only_moves_forward() {
        let mut job = Job::queued(1);
        assert!(!job.complete(PathBuf::from("x.mp4")));
        assert!(job.start());
        assert!(!job.start());
        job.set_progress(0.5);
        job.set_progress(0.25);
        assert_eq!(job.progress, 0.5);
        assert!(job.complete(PathBuf::from("x.mp4")));
        assert_eq!(job.progress, 1.0);
        assert!(!job.fail(ErrorKind::Input, "late"));
        assert_eq!(job.state, JobState::Completed);
        assert!(job.error.is_none());
    }

    #[test]
    fn failure_records_kind_and_message() {
        let mut job = Job::queued(2);
        job.start();
        assert!(job.fail(ErrorKind::EncoderProcess, "exit 1"));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.error,
            Some(JobFailure {
                kind: ErrorKind::EncoderProcess,
                message: "exit 1".into()
            })
        );
        assert!(job.output_path.is_none());
        job.set_progress(0.9);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn store_reads_snapshots_and_updates_in_place() {
        let store = InMemoryJobStore::new();
        store.insert(Job::queued(7));
        store.insert(Job::queued(3));
        assert_eq!(store.ids(), vec![3, 7]);

        let before = store.get(7).unwrap();
        assert!(store.update(7, &mut |j| {
            j.start();
        }));
        assert_eq!(before.state, JobState::Queued);
        assert_eq!(store.get(7).unwrap().state, JobState::Processing);

        assert!(!store.update(99, &mut |_| {}));
        assert!(store.remove(3).is_some());
        assert!(store.get(3).is_none());
    }

    #[test]
    fn status_serializes_for_outer_layers() {
        let mut job = Job::queued(5);
        job.start();
        job.fail(ErrorKind::Input, "bad audio");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"]["kind"], "input");
    }
}
