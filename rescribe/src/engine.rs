//! The transcription engine seam.
//!
//! An engine typically owns an expensive, single instance resource such as model weights held in
//! an accelerator context. It is never called concurrently: every call goes through the
//! [`ResourceGuard`](crate::guard::ResourceGuard) which hands out exclusive access one caller at a
//! time. Calls are blocking and run on tokio's blocking thread pool.
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Turns a single audio file into text.
#[cfg_attr(test, mockall::automock)]
pub trait TranscriptionEngine: Send + 'static {
    /// Called once at the start of every job before any file is transcribed.
    ///
    /// Returning an error fails the job as a whole, e.g. when the model cannot be loaded.
    fn prepare(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Transcribe the audio file at `path`.
    ///
    /// Errors only fail the current file; the job carries on with the next one.
    fn transcribe(&mut self, path: &Path) -> Result<String, EngineError>;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Transcription engine unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to transcribe {path}: {message}")]
    Transcription { path: PathBuf, message: String },
    #[error("Transcription engine io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn transcription(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Transcription {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn error_type(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Transcription { .. } => "transcription",
            Self::Io(_) => "io",
        }
    }
}
