//! Helpers for testing.
//!
//! [`ScriptedEngine`] stands in for a real transcription engine, failing or pausing on chosen
//! files, and the `wait_for*` helpers poll a [`Rescribe`] until a job reaches a given state.
//!
//! ```
//! # use rescribe::prelude::*;
//! use rescribe::testing::{wait_for_terminal, ScriptedEngine};
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let dir = tempfile::tempdir().unwrap();
//! std::fs::write(dir.path().join("1.wav"), b"").unwrap();
//! std::fs::write(dir.path().join("2.wav"), b"").unwrap();
//!
//! let engine = ScriptedEngine::new().failing_on("2.wav");
//! let rescribe = Rescribe::new(engine.clone(), DirectorySource::new());
//! let job_id = rescribe.create_job(dir.path(), 0).await.unwrap();
//!
//! let job = wait_for_terminal(&rescribe, job_id).await;
//! assert_eq!(job.status, JobStatus::Completed);
//! assert_eq!((job.success_count(), job.failed_count()), (1, 1));
//! assert_eq!(engine.calls().len(), 2);
//! # });
//! ```
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::oneshot;

use crate::{
    engine::{EngineError, TranscriptionEngine},
    job::{Job, JobId},
    source::AudioSource,
    Rescribe,
};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`TranscriptionEngine`] with scripted behaviour per file name.
///
/// Clones share the same script and call log, so keep a clone to inspect calls after handing
/// the engine to [`Rescribe`].
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    failures: HashSet<String>,
    holds: HashMap<String, Hold>,
    unavailable: Option<String>,
    calls: Vec<PathBuf>,
}

struct Hold {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// A file the engine pauses on, see [`ScriptedEngine::hold_on`].
pub struct HeldFile {
    entered: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl HeldFile {
    /// Resolves once the engine has started transcribing the held file.
    pub async fn entered(&mut self) {
        let _ = (&mut self.entered).await;
    }

    /// Let the engine finish the held file.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every transcription of a file with this name.
    pub fn failing_on(self, file_name: impl Into<String>) -> Self {
        self.script().failures.insert(file_name.into());
        self
    }

    /// Fail [`TranscriptionEngine::prepare`] with [`EngineError::Unavailable`].
    pub fn unavailable(self, reason: impl Into<String>) -> Self {
        self.script().unavailable = Some(reason.into());
        self
    }

    /// Pause the next transcription of a file with this name until [`HeldFile::release`].
    ///
    /// The engine stays locked while paused, so other jobs wait too.
    pub fn hold_on(&self, file_name: impl Into<String>) -> HeldFile {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.script().holds.insert(
            file_name.into(),
            Hold {
                entered: entered_tx,
                release: release_rx,
            },
        );
        HeldFile {
            entered: entered_rx,
            release: release_tx,
        }
    }

    /// Every path passed to [`TranscriptionEngine::transcribe`] so far.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.script().calls.clone()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TranscriptionEngine for ScriptedEngine {
    fn prepare(&mut self) -> Result<(), EngineError> {
        match &self.script().unavailable {
            Some(reason) => Err(EngineError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn transcribe(&mut self, path: &Path) -> Result<String, EngineError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (hold, fails) = {
            let mut script = self.script();
            script.calls.push(path.to_path_buf());
            (script.holds.remove(&name), script.failures.contains(&name))
        };
        if let Some(Hold { entered, release }) = hold {
            let _ = entered.send(());
            let _ = release.blocking_recv();
        }
        if fails {
            Err(EngineError::transcription(path, "scripted failure"))
        } else {
            Ok(format!("transcript of {name}"))
        }
    }
}

/// Poll `job_id` until `condition` holds, returning the matching snapshot.
///
/// # Panics
///
/// When the job is unknown or the condition does not hold within ten seconds.
pub async fn wait_for<E, S>(
    rescribe: &Rescribe<E, S>,
    job_id: JobId,
    mut condition: impl FnMut(&Job) -> bool,
) -> Job
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    let poll = async {
        loop {
            let job = rescribe.job_status(job_id).expect("job should exist");
            if condition(&job) {
                return job;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(POLL_TIMEOUT, poll)
        .await
        .unwrap_or_else(|_| panic!("Job {job_id} did not reach the expected state"))
}

/// Poll `job_id` until it reaches a terminal status.
pub async fn wait_for_terminal<E, S>(rescribe: &Rescribe<E, S>, job_id: JobId) -> Job
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    wait_for(rescribe, job_id, |job| job.status.is_terminal()).await
}

/// Every snapshot seen while polling `job_id` until it is terminal, the terminal one last.
pub async fn observe_until_terminal<E, S>(rescribe: &Rescribe<E, S>, job_id: JobId) -> Vec<Job>
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    let mut observed = Vec::new();
    wait_for(rescribe, job_id, |job| {
        observed.push(job.clone());
        job.status.is_terminal()
    })
    .await;
    observed
}
