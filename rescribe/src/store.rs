//! The in memory record of every job.
//!
//! [`JobStore`] is the single source of truth for job state. Status queries and cancellation
//! requests read and write it from request handling code while each job's runner advances its own
//! record. A single lock guards the whole map so a reader never observes a torn status or a
//! counter update without its matching outcome.
//!
//! Records live for the lifetime of the process; nothing is ever removed.
use std::{
    collections::hash_map::Entry,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobId, JobStatus, Progress};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    JobNotFound(JobId),
    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("Job {0} is not accepting file outcomes")]
    NotProcessing(JobId),
    #[error("Job store in bad state")]
    BadState,
}

/// The result of attempting a single file.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Outcome {
    Success,
    Failure,
}

/// A concurrency safe map from [`JobId`] to job state.
///
/// Cloning is cheap and every clone refers to the same records.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<FxHashMap<JobId, JobRecord>>>,
}

pub(crate) struct JobRecord {
    id: JobId,
    input_path: PathBuf,
    status: JobStatus,
    priority: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    cancellation: CancellationToken,
    /// Counters while the job is active, taken into `snapshot` once terminal.
    live: Option<Progress>,
    snapshot: Progress,
}

impl JobRecord {
    fn new(id: JobId, input_path: PathBuf, priority: i32) -> Self {
        Self {
            id,
            input_path,
            status: JobStatus::Queued,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            cancellation: CancellationToken::new(),
            live: None,
            snapshot: Progress::default(),
        }
    }

    fn to_job(&self) -> Job {
        Job {
            id: self.id,
            input_path: self.input_path.clone(),
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancel_requested: self.cancellation.is_cancelled(),
            error: self.error.clone(),
            progress: self.live.unwrap_or(self.snapshot),
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), StoreError> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(job_id = %self.id, from = %self.status, to = %next, "Job {} is {next}", self.id);
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
            if let Some(progress) = self.live.take() {
                self.snapshot = progress;
            }
        }
        Ok(())
    }

    fn mark_job_processing(&mut self, total: usize) -> Result<(), StoreError> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        self.live = Some(Progress::new(total));
        Ok(())
    }

    fn record_outcome(&mut self, outcome: Outcome) -> Result<Progress, StoreError> {
        let progress = self
            .live
            .as_mut()
            .filter(|progress| progress.processed < progress.total)
            .ok_or(StoreError::NotProcessing(self.id))?;
        match outcome {
            Outcome::Success => progress.record_success(),
            Outcome::Failure => progress.record_failure(),
        }
        Ok(*progress)
    }

    fn mark_job_failed(&mut self, error: String) -> Result<(), StoreError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    fn request_cancel(&mut self) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        self.cancellation.cancel();
        Ok(())
    }
}

impl JobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new [`JobStatus::Queued`] job and returns its freshly allocated id.
    ///
    /// Allocation and insertion happen under the same lock, so concurrent callers can never be
    /// handed the same id.
    pub(crate) fn create(&self, input_path: PathBuf, priority: i32) -> Result<JobId, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        loop {
            let id = JobId::new();
            if let Entry::Vacant(entry) = jobs.entry(id) {
                entry.insert(JobRecord::new(id, input_path, priority));
                tracing::debug!(job_id = %id, "Job {id} queued");
                return Ok(id);
            }
        }
    }

    /// A snapshot of the job with the given id.
    pub fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .get(&id)
            .map(JobRecord::to_job)
            .ok_or(StoreError::JobNotFound(id))
    }

    /// Snapshots of every job, oldest first.
    pub fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .values()
            .map(JobRecord::to_job)
            .collect::<Vec<_>>();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    /// Ask the job to stop before its next file.
    ///
    /// This only raises the job's cancellation flag. A file already being transcribed is
    /// finished, and the status changes once the job's runner notices the request.
    pub fn request_cancel(&self, id: JobId) -> Result<(), StoreError> {
        self.update(id, JobRecord::request_cancel)
    }

    /// Applies `mutator` to the record of `id` while holding the store's write lock.
    pub(crate) fn update<T>(
        &self,
        id: JobId,
        mutator: impl FnOnce(&mut JobRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        match jobs.get_mut(&id) {
            None => Err(StoreError::JobNotFound(id)),
            Some(record) => mutator(record),
        }
    }

    pub(crate) fn cancellation_token(&self, id: JobId) -> Result<CancellationToken, StoreError> {
        self.update(id, |record| Ok(record.cancellation.clone()))
    }

    /// Request cancellation of every job that has not finished, returning how many were asked.
    pub(crate) fn cancel_active(&self) -> Result<usize, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        Ok(jobs
            .values_mut()
            .filter_map(|record| record.request_cancel().ok())
            .count())
    }

    pub(crate) fn mark_job_processing(&self, id: JobId, total: usize) -> Result<(), StoreError> {
        self.update(id, |record| record.mark_job_processing(total))
    }

    pub(crate) fn record_outcome(&self, id: JobId, outcome: Outcome) -> Result<Progress, StoreError> {
        self.update(id, |record| record.record_outcome(outcome))
    }

    pub(crate) fn mark_job_completed(&self, id: JobId) -> Result<(), StoreError> {
        self.update(id, |record| record.transition(JobStatus::Completed))
    }

    pub(crate) fn mark_job_cancelled(&self, id: JobId) -> Result<(), StoreError> {
        self.update(id, |record| record.transition(JobStatus::Cancelled))
    }

    pub(crate) fn mark_job_failed(&self, id: JobId, error: impl ToString) -> Result<(), StoreError> {
        self.update(id, |record| record.mark_job_failed(error.to_string()))
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use assert_matches::assert_matches;

    use super::*;

    fn store_with_job() -> (JobStore, JobId) {
        let store = JobStore::new();
        let id = store.create("/data/audio".into(), 3).unwrap();
        (store, id)
    }

    #[test]
    fn create_inserts_queued_job() {
        let (store, id) = store_with_job();

        let job = store.get(id).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.priority, 3);
        assert_eq!(job.input_path, PathBuf::from("/data/audio"));
        assert_eq!(job.progress, Progress::default());
        assert!(!job.cancel_requested);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn get_unknown_job() {
        let store = JobStore::new();
        let id = JobId::new();
        assert_matches!(store.get(id), Err(StoreError::JobNotFound(missing)) if missing == id);
    }

    #[test]
    fn concurrent_creates_yield_distinct_ids() {
        let store = JobStore::new();
        let handles = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| store.create(format!("/data/{i}").into(), 0).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        let ids = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect::<HashSet<_>>();

        assert_eq!(ids.len(), 400);
        assert_eq!(store.list().unwrap().len(), 400);
    }

    #[test]
    fn progress_moves_to_snapshot_on_completion() {
        let (store, id) = store_with_job();
        store.mark_job_processing(id, 2).unwrap();
        store.record_outcome(id, Outcome::Success).unwrap();

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());
        assert_eq!(job.processed(), 1);

        store.record_outcome(id, Outcome::Failure).unwrap();
        store.mark_job_completed(id).unwrap();

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert_eq!(
            job.progress,
            Progress {
                total: 2,
                processed: 2,
                success: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn outcomes_beyond_total_are_rejected() {
        let (store, id) = store_with_job();
        store.mark_job_processing(id, 1).unwrap();
        store.record_outcome(id, Outcome::Success).unwrap();

        assert_matches!(
            store.record_outcome(id, Outcome::Success),
            Err(StoreError::NotProcessing(_))
        );
        assert_eq!(store.get(id).unwrap().processed(), 1);
    }

    #[test]
    fn outcomes_require_processing() {
        let (store, id) = store_with_job();
        assert_matches!(
            store.record_outcome(id, Outcome::Success),
            Err(StoreError::NotProcessing(_))
        );
    }

    #[test]
    fn terminal_jobs_do_not_transition() {
        let (store, id) = store_with_job();
        store.mark_job_failed(id, "no audio files").unwrap();

        assert_matches!(
            store.mark_job_processing(id, 1),
            Err(StoreError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Processing,
                ..
            })
        );
        assert_matches!(
            store.mark_job_completed(id),
            Err(StoreError::InvalidTransition { .. })
        );

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("no audio files"));
        assert_eq!(job.total(), 0);
    }

    #[test]
    fn request_cancel_flags_but_keeps_status() {
        let (store, id) = store_with_job();
        let token = store.cancellation_token(id).unwrap();

        store.request_cancel(id).unwrap();
        store.request_cancel(id).unwrap();

        let job = store.get(id).unwrap();
        assert!(token.is_cancelled());
        assert!(job.cancel_requested);
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn request_cancel_on_terminal_job() {
        let (store, id) = store_with_job();
        store.mark_job_processing(id, 1).unwrap();
        store.record_outcome(id, Outcome::Success).unwrap();
        store.mark_job_completed(id).unwrap();
        let before = store.get(id).unwrap();

        assert_matches!(
            store.request_cancel(id),
            Err(StoreError::AlreadyTerminal {
                status: JobStatus::Completed,
                ..
            })
        );
        assert_eq!(store.get(id).unwrap(), before);
    }

    #[test]
    fn request_cancel_unknown_job() {
        let store = JobStore::new();
        assert_matches!(
            store.request_cancel(JobId::new()),
            Err(StoreError::JobNotFound(_))
        );
    }

    #[test]
    fn cancel_active_skips_finished_jobs() {
        let store = JobStore::new();
        let active = store.create("/a".into(), 0).unwrap();
        let finished = store.create("/b".into(), 0).unwrap();
        store.mark_job_failed(finished, "boom").unwrap();

        assert_eq!(store.cancel_active().unwrap(), 1);
        assert!(store.get(active).unwrap().cancel_requested);
        assert!(!store.get(finished).unwrap().cancel_requested);
    }

    #[test]
    fn list_is_ordered_by_creation() {
        let store = JobStore::new();
        let first = store.create("/a".into(), 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = store.create("/b".into(), 0).unwrap();

        let ids = store
            .list()
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn bad_state_errors() {
        let (store, id) = store_with_job();
        std::thread::spawn({
            let store = store.clone();
            move || {
                let _guard = store.jobs.write();
                panic!()
            }
        })
        .join()
        .unwrap_err();

        assert_matches!(store.create("/c".into(), 0), Err(StoreError::BadState));
        assert_matches!(store.get(id), Err(StoreError::BadState));
        assert_matches!(store.list(), Err(StoreError::BadState));
        assert_matches!(store.request_cancel(id), Err(StoreError::BadState));
        assert_matches!(store.mark_job_completed(id), Err(StoreError::BadState));
    }
}
