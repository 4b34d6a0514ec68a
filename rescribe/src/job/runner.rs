use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    engine::{EngineError, TranscriptionEngine},
    guard::ResourceGuard,
    source::AudioSource,
    store::{JobStore, Outcome, StoreError},
};

use super::JobId;

const ERROR_TYPE_PANIC: &str = "panic";
const ERROR_TYPE_WRITE: &str = "write";

/// Why a single file could not be transcribed.
#[derive(Debug)]
pub(crate) struct FileError {
    pub error_type: &'static str,
    pub message: String,
}

/// Drives one job from `queued` to a terminal status.
pub(crate) struct JobRunner<E, S> {
    store: JobStore,
    guard: ResourceGuard<E>,
    source: Arc<S>,
}

impl<E, S> JobRunner<E, S>
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    pub(crate) fn new(store: JobStore, guard: ResourceGuard<E>, source: S) -> Self {
        Self {
            store,
            guard,
            source: Arc::new(source),
        }
    }

    #[instrument(skip_all, fields(job_id = %job_id))]
    pub(crate) async fn run(
        &self,
        job_id: JobId,
        input_path: PathBuf,
        cancellation: CancellationToken,
    ) {
        if let Err(err) = self.execute_job(job_id, &input_path, &cancellation).await {
            tracing::error!(?err, %job_id, "Failed to record progress of job {job_id}: {err}");
            let _ = self
                .store
                .mark_job_failed(job_id, &err)
                .inspect_err(|err| {
                    tracing::error!(?err, %job_id, "Failed to mark job {job_id} failed")
                });
        }
    }

    async fn execute_job(
        &self,
        job_id: JobId,
        input_path: &Path,
        cancellation: &CancellationToken,
    ) -> Result<(), StoreError> {
        if cancellation.is_cancelled() {
            tracing::info!(%job_id, "Job {job_id} cancelled before it started");
            return self.store.mark_job_cancelled(job_id);
        }

        match self.guard.run_exclusive(|engine| engine.prepare()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return self.fail_job(job_id, error),
            Err(error) => return self.fail_job(job_id, FileError::from(error).message),
        }

        let files = match self.discover(input_path).await {
            Ok(files) if files.is_empty() => {
                return self.fail_job(
                    job_id,
                    format!("No audio files found under {}", input_path.display()),
                )
            }
            Ok(files) => files,
            Err(error) => return self.fail_job(job_id, error),
        };

        self.store.mark_job_processing(job_id, files.len())?;
        tracing::info!(%job_id, total = files.len(), "Processing {} files for job {job_id}", files.len());

        for file in &files {
            if cancellation.is_cancelled() {
                let progress = self.store.get(job_id)?.progress;
                tracing::info!(
                    %job_id,
                    processed = progress.processed,
                    remaining = progress.remaining(),
                    "Job {job_id} cancelled",
                );
                return self.store.mark_job_cancelled(job_id);
            }

            let outcome = match self.process_file(file).await {
                Ok(()) => Outcome::Success,
                Err(error) => {
                    tracing::warn!(
                        %job_id,
                        path = %file.display(),
                        error_type = error.error_type,
                        "Failed to transcribe {}: {}",
                        file.display(),
                        error.message
                    );
                    Outcome::Failure
                }
            };
            let progress = self.store.record_outcome(job_id, outcome)?;
            tracing::debug!(%job_id, processed = progress.processed, total = progress.total, "Processed {}", file.display());
        }

        self.store.mark_job_completed(job_id)?;
        let progress = self.store.get(job_id)?.progress;
        tracing::info!(
            %job_id,
            success = progress.success,
            failed = progress.failed,
            "Job {job_id} complete",
        );
        Ok(())
    }

    async fn discover(&self, input_path: &Path) -> Result<Vec<PathBuf>, String> {
        let source = self.source.clone();
        let root = input_path.to_path_buf();
        match tokio::task::spawn_blocking(move || source.discover(&root)).await {
            Ok(Ok(files)) => Ok(files),
            Ok(Err(error)) => Err(error.to_string()),
            Err(error) => Err(FileError::from(error).message),
        }
    }

    /// Transcribes `file` unless its transcript already exists.
    async fn process_file(&self, file: &Path) -> Result<(), FileError> {
        let artifact = self.source.artifact_path(file);
        if tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            tracing::debug!(path = %file.display(), "Transcript exists, skipping {}", file.display());
            return Ok(());
        }

        let input = file.to_path_buf();
        let text = self
            .guard
            .run_exclusive(move |engine| engine.transcribe(&input))
            .await??;

        tokio::fs::write(&artifact, text)
            .await
            .map_err(|error| FileError {
                error_type: ERROR_TYPE_WRITE,
                message: format!("Failed to write {}: {error}", artifact.display()),
            })
    }

    fn fail_job(&self, job_id: JobId, error: impl ToString) -> Result<(), StoreError> {
        let error = error.to_string();
        tracing::error!(%job_id, %error, "Job {job_id} failed: {error}");
        self.store.mark_job_failed(job_id, error)
    }
}

impl From<EngineError> for FileError {
    fn from(value: EngineError) -> Self {
        Self {
            error_type: value.error_type(),
            message: value.to_string(),
        }
    }
}

impl From<JoinError> for FileError {
    fn from(value: JoinError) -> Self {
        let msg = value.to_string();
        let message = match value.try_into_panic() {
            Ok(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or(msg),
            Err(_) => msg,
        };
        Self {
            error_type: ERROR_TYPE_PANIC,
            message,
        }
    }
}
