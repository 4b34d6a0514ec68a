//! A transcription engine backed by an external program.
use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use rescribe::prelude::{EngineError, TranscriptionEngine};

/// Replaced by the audio file path in engine arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Runs a program once per audio file and reads the transcript from its stdout.
///
/// Every argument containing [`INPUT_PLACEHOLDER`] has it replaced by the file path. When no
/// argument contains the placeholder the path is appended as the last argument. A non-zero exit
/// fails the file with whatever the program wrote to stderr.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I>(self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// The program to run, found directly for a path or by searching `PATH` for a bare name.
    fn resolve_program(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 {
            return self.program.is_file().then(|| self.program.clone());
        }
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(&self.program))
            .find(|candidate| candidate.is_file())
    }

    fn command(&self, input: &Path) -> Command {
        let mut command = Command::new(&self.program);
        let input_arg = input.to_string_lossy();
        let mut substituted = false;
        for arg in &self.args {
            if arg.contains(INPUT_PLACEHOLDER) {
                substituted = true;
                command.arg(arg.replace(INPUT_PLACEHOLDER, &input_arg));
            } else {
                command.arg(arg);
            }
        }
        if !substituted {
            command.arg(input);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl TranscriptionEngine for CommandEngine {
    fn prepare(&mut self) -> Result<(), EngineError> {
        match self.resolve_program() {
            Some(program) => {
                tracing::debug!(program = %program.display(), "Using transcription program");
                Ok(())
            }
            None => Err(EngineError::Unavailable(format!(
                "program {} not found",
                self.program.display()
            ))),
        }
    }

    fn transcribe(&mut self, path: &Path) -> Result<String, EngineError> {
        let output = self.command(path).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::transcription(
                path,
                format!("{} ({})", stderr.trim(), output.status),
            ));
        }
        let text = String::from_utf8(output.stdout)
            .map_err(|err| EngineError::transcription(path, err))?;
        Ok(text.trim().to_owned())
    }
}

#[cfg(all(test, unix))]
mod test {
    use std::fs;

    use assert_matches::assert_matches;
    use tempfile::TempDir;

    use super::*;

    fn audio(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("talk.wav");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn appends_input_when_no_placeholder() {
        let dir = TempDir::new().unwrap();
        let path = audio(&dir, "  hello world\n");
        let mut engine = CommandEngine::new("cat");

        engine.prepare().unwrap();
        assert_eq!(engine.transcribe(&path).unwrap(), "hello world");
    }

    #[test]
    fn substitutes_placeholder() {
        let dir = TempDir::new().unwrap();
        let path = audio(&dir, "");
        let mut engine = CommandEngine::new("/bin/sh").with_args([
            "-c",
            "printf 'text of %s' \"$1\"",
            "sh",
            "--file={input}",
        ]);

        assert_eq!(
            engine.transcribe(&path).unwrap(),
            format!("text of --file={}", path.display())
        );
    }

    #[test]
    fn non_zero_exit_fails_the_file() {
        let dir = TempDir::new().unwrap();
        let path = audio(&dir, "");
        let mut engine =
            CommandEngine::new("/bin/sh").with_args(["-c", "echo model exploded >&2; exit 3"]);

        assert_matches!(
            engine.transcribe(&path),
            Err(EngineError::Transcription { path: failed, message })
                if failed == path && message.contains("model exploded")
        );
    }

    #[test]
    fn missing_program_is_unavailable() {
        let mut by_name = CommandEngine::new("rescribe-no-such-program");
        assert_matches!(by_name.prepare(), Err(EngineError::Unavailable(_)));

        let mut by_path = CommandEngine::new("/nonexistent/rescribe/engine");
        assert_matches!(by_path.prepare(), Err(EngineError::Unavailable(_)));
    }

    #[test]
    fn spawn_failure_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let path = audio(&dir, "");
        let mut engine = CommandEngine::new("/nonexistent/rescribe/engine");

        assert_matches!(engine.transcribe(&path), Err(EngineError::Io(_)));
    }
}
