//! Finding the audio files of a job and where their transcripts go.
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Discovers the input files of a job.
pub trait AudioSource: Send + Sync + 'static {
    /// Every audio file under `root`, in the order they should be transcribed.
    fn discover(&self, root: &Path) -> Result<Vec<PathBuf>, SourceError>;

    /// The transcript written for `input`.
    ///
    /// If this file already exists the input is treated as transcribed and skipped.
    fn artifact_path(&self, input: &Path) -> PathBuf;
}

/// Recursively walks a directory for audio files by extension.
///
/// Transcripts are written next to their input with the extension swapped, so `talk/intro.wav`
/// becomes `talk/intro.txt`. With more than one audio extension configured the input's extension
/// is kept, `talk/intro.wav.txt` and `talk/intro.mp3.txt`, so same-named inputs never share a
/// transcript.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    extensions: Vec<String>,
    artifact_extension: String,
    skip_marker: Option<String>,
}

impl Default for DirectorySource {
    fn default() -> Self {
        Self {
            extensions: vec![Self::DEFAULT_EXTENSION.to_owned()],
            artifact_extension: Self::DEFAULT_ARTIFACT_EXTENSION.to_owned(),
            skip_marker: None,
        }
    }
}

impl DirectorySource {
    pub const DEFAULT_EXTENSION: &'static str = "wav";
    pub const DEFAULT_ARTIFACT_EXTENSION: &'static str = "txt";

    pub fn new() -> Self {
        Self::default()
    }

    /// Audio file extensions to pick up, compared case insensitively.
    pub fn with_extensions<I, S>(self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            ..self
        }
    }

    pub fn with_artifact_extension(self, extension: impl AsRef<str>) -> Self {
        Self {
            artifact_extension: extension.as_ref().trim_start_matches('.').to_owned(),
            ..self
        }
    }

    /// Skip every directory (and everything below it) that contains a file with this name.
    pub fn with_skip_marker(self, marker: impl Into<String>) -> Self {
        Self {
            skip_marker: Some(marker.into()),
            ..self
        }
    }

    fn is_audio(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn is_marked(&self, entry: &DirEntry) -> bool {
        match &self.skip_marker {
            Some(marker) if entry.file_type().is_dir() => {
                let marked = entry.path().join(marker).is_file();
                if marked {
                    tracing::debug!(path = %entry.path().display(), "Skipping marked directory");
                }
                marked
            }
            _ => false,
        }
    }
}

impl AudioSource for DirectorySource {
    fn discover(&self, root: &Path) -> Result<Vec<PathBuf>, SourceError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_marked(entry))
        {
            match entry {
                Ok(entry) if entry.file_type().is_file() && self.is_audio(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(source) if source.depth() == 0 => {
                    return Err(SourceError::ReadDirectory {
                        path: root.to_path_buf(),
                        source,
                    });
                }
                Err(error) => {
                    tracing::warn!(%error, "Skipping unreadable entry under {}", root.display());
                }
            }
        }
        tracing::debug!(count = files.len(), "Discovered {} audio files under {}", files.len(), root.display());
        Ok(files)
    }

    fn artifact_path(&self, input: &Path) -> PathBuf {
        if self.extensions.len() <= 1 {
            return input.with_extension(&self.artifact_extension);
        }
        let mut file_name = input.file_name().unwrap_or_default().to_os_string();
        file_name.push(".");
        file_name.push(&self.artifact_extension);
        input.with_file_name(file_name)
    }
}
