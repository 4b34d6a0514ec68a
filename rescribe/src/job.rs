//! Jobs and their observable state.
//!
//! A [`Job`] is a snapshot of a transcription job taken from the
//! [`JobStore`](crate::store::JobStore). Snapshots never change once handed out; poll the store
//! (or [`Rescribe::job_status`](crate::Rescribe::job_status)) again to observe progress.
use std::{fmt::Display, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub(crate) mod runner;

/// The unique identifier of a job.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// The lifecycle of a job.
///
/// ```text
/// queued ──► processing ──► completed
///    │            │
///    ├────────────┴───────► failed
///    └────────────┴───────► cancelled
/// ```
///
/// [`JobStatus::Completed`], [`JobStatus::Failed`], and [`JobStatus::Cancelled`] are terminal:
/// once reached the job never changes again.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing | Failed | Cancelled) | (Processing, Completed | Failed | Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file counters of a job.
///
/// `success + failed == processed` holds at all times and `processed` never exceeds `total`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct Progress {
    /// The number of audio files discovered under the job's input path.
    pub total: usize,
    /// The number of files the job has finished attempting.
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
}

impl Progress {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.success += 1;
        self.processed += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed += 1;
        self.processed += 1;
    }

    /// Files that have not been attempted yet.
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }
}

/// A snapshot of a transcription job.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    /// The absolute directory the job transcribes.
    pub input_path: PathBuf,
    pub status: JobStatus,
    /// Stored and reported as given; jobs are not ordered by it.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// When the job moved to [`JobStatus::Processing`].
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether a cancellation has been requested and not yet observed, or was observed.
    pub cancel_requested: bool,
    /// The job level failure, only set for [`JobStatus::Failed`].
    pub error: Option<String>,
    pub progress: Progress,
}

impl Job {
    pub fn success_count(&self) -> usize {
        self.progress.success
    }

    pub fn failed_count(&self) -> usize {
        self.progress.failed
    }

    pub fn processed(&self) -> usize {
        self.progress.processed
    }

    pub fn total(&self) -> usize {
        self.progress.total
    }
}
