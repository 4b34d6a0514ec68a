//! Background batch transcription jobs.
//!
//! [`Rescribe`] accepts a directory, transcribes every audio file below it on a background task,
//! and lets callers poll for progress or ask the job to stop. All jobs share one
//! [`TranscriptionEngine`] behind a [`ResourceGuard`], so files are transcribed one at a time
//! across the whole process.
//!
//! ```no_run
//! # use std::path::Path;
//! use rescribe::prelude::*;
//!
//! struct Echo;
//!
//! impl TranscriptionEngine for Echo {
//!     fn transcribe(&mut self, path: &Path) -> Result<String, EngineError> {
//!         Ok(path.display().to_string())
//!     }
//! }
//!
//! # async fn run() -> Result<(), RescribeError> {
//! let rescribe = Rescribe::new(Echo, DirectorySource::new().with_extensions(["wav", "mp3"]));
//! let job_id = rescribe.create_job("/data/interviews", 0).await?;
//! let job = rescribe.job_status(job_id)?;
//! println!("{}: {}/{}", job.status, job.processed(), job.total());
//! # Ok(())
//! # }
//! ```
use std::{
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex},
};

pub mod engine;
pub mod guard;
pub mod job;
pub mod prelude;
pub mod source;
pub mod store;
pub mod testing;

use engine::TranscriptionEngine;
use fxhash::FxHashMap;
use guard::ResourceGuard;
use job::{runner::JobRunner, Job, JobId, JobStatus};
use source::{AudioSource, DirectorySource};
use store::{JobStore, StoreError};
use thiserror::Error;
use tokio::task::JoinHandle;

/// The job service.
///
/// Owns the [`JobStore`] and the [`ResourceGuard`] for the engine. Cloning is cheap and clones
/// share the same jobs and engine.
pub struct Rescribe<E, S = DirectorySource> {
    store: JobStore,
    runner: Arc<JobRunner<E, S>>,
    tasks: Arc<Mutex<JobTasks>>,
}

/// The spawned runner of every job, closed to new jobs once shutdown starts.
#[derive(Default)]
struct JobTasks {
    shutting_down: bool,
    handles: FxHashMap<JobId, JoinHandle<()>>,
}

impl<E, S> Clone for Rescribe<E, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            runner: self.runner.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<E, S> Rescribe<E, S>
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    pub fn new(engine: E, source: S) -> Self {
        let store = JobStore::new();
        Self {
            runner: Arc::new(JobRunner::new(
                store.clone(),
                ResourceGuard::new(engine),
                source,
            )),
            store,
            tasks: Default::default(),
        }
    }

    /// Queue a job transcribing every audio file under `input_path`.
    ///
    /// The path must be an existing directory and may not contain `..` segments. No job is
    /// created when validation fails. The job starts running immediately on its own task;
    /// `priority` is recorded but does not affect when it runs.
    ///
    /// Returns [`RescribeError::ShuttingDown`] once [`Rescribe::graceful_shutdown`] has been called.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn create_job(
        &self,
        input_path: impl AsRef<Path>,
        priority: i32,
    ) -> Result<JobId, RescribeError> {
        let input_path = validate_input_path(input_path.as_ref()).await?;

        let mut tasks = self.tasks.lock().map_err(|_| StoreError::BadState)?;
        if tasks.shutting_down {
            return Err(RescribeError::ShuttingDown);
        }
        let job_id = self.store.create(input_path.clone(), priority)?;
        let cancellation = self.store.cancellation_token(job_id)?;

        let handle = tokio::spawn({
            let runner = self.runner.clone();
            async move { runner.run(job_id, input_path, cancellation).await }
        });
        tasks.handles.retain(|_, handle| !handle.is_finished());
        tasks.handles.insert(job_id, handle);
        tracing::debug!(%job_id, priority, "Created job {job_id}");
        Ok(job_id)
    }

    /// The current state of a job.
    pub fn job_status(&self, job_id: JobId) -> Result<Job, RescribeError> {
        Ok(self.store.get(job_id)?)
    }

    /// Every job known to this process, oldest first.
    pub fn jobs(&self) -> Result<Vec<Job>, RescribeError> {
        Ok(self.store.list()?)
    }

    /// Ask a job to stop before its next file.
    ///
    /// Returns [`RescribeError::InvalidState`] when the job has already finished.
    pub fn cancel_job(&self, job_id: JobId) -> Result<(), RescribeError> {
        self.store.request_cancel(job_id)?;
        tracing::info!(%job_id, "Cancellation requested for job {job_id}");
        Ok(())
    }

    /// Stop accepting jobs, cancel every unfinished job and wait for all job tasks to stop.
    ///
    /// Files in flight are finished first.
    pub async fn graceful_shutdown(&self) -> Result<(), RescribeError> {
        let handles = {
            let mut tasks = self.tasks.lock().map_err(|_| StoreError::BadState)?;
            tasks.shutting_down = true;
            tasks
                .handles
                .drain()
                .map(|(_, handle)| handle)
                .collect::<Vec<_>>()
        };
        let cancelled = self.store.cancel_active()?;
        tracing::debug!(cancelled, "Shutting down Rescribe jobs");
        futures::future::join_all(handles)
            .await
            .into_iter()
            .try_for_each(|result| {
                result.map_err(|err| {
                    tracing::error!(?err, "Job task failed during shutdown");
                    RescribeError::GracefulShutdownFailed
                })
            })
    }
}

async fn validate_input_path(path: &Path) -> Result<PathBuf, RescribeError> {
    let invalid = |reason| RescribeError::InvalidPath {
        path: path.to_path_buf(),
        reason,
    };
    if path.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(invalid("relative traversal is not allowed"));
    }
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| invalid("path does not exist"))?;
    if !metadata.is_dir() {
        return Err(invalid("path is not a directory"));
    }
    tokio::fs::canonicalize(path)
        .await
        .map_err(|_| invalid("path could not be resolved"))
}

#[derive(Debug, Error)]
pub enum RescribeError {
    #[error("Invalid input path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: &'static str },
    #[error("Job {0} not found")]
    NotFound(JobId),
    #[error("Job {id} is already {status}")]
    InvalidState { id: JobId, status: JobStatus },
    #[error("Error communicating with the job store")]
    Store(#[source] StoreError),
    #[error("Rescribe is shutting down and not accepting jobs")]
    ShuttingDown,
    #[error("Failed to gracefully shut down")]
    GracefulShutdownFailed,
}

impl From<StoreError> for RescribeError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::JobNotFound(id) => Self::NotFound(id),
            StoreError::AlreadyTerminal { id, status } => Self::InvalidState { id, status },
            error => Self::Store(error),
        }
    }
}
