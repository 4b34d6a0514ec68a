use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use rescribe::prelude::DirectorySource;

use crate::engine::CommandEngine;

/// rescribe-server - background transcription jobs over HTTP
#[derive(Debug, Parser)]
#[command(name = "rescribe-server")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "RESCRIBE_BIND", default_value = "0.0.0.0:8082")]
    pub bind: SocketAddr,

    /// Program run once per audio file, printing the transcript on stdout
    #[arg(long, env = "RESCRIBE_ENGINE")]
    pub engine: PathBuf,

    /// Argument passed to the engine program, `{input}` is replaced by the audio file path
    /// (appended last when no argument contains it)
    #[arg(
        long = "engine-arg",
        env = "RESCRIBE_ENGINE_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub engine_args: Vec<String>,

    /// Audio file extensions to transcribe
    #[arg(
        long = "extension",
        env = "RESCRIBE_EXTENSIONS",
        value_delimiter = ',',
        default_value = DirectorySource::DEFAULT_EXTENSION
    )]
    pub extensions: Vec<String>,

    /// Extension of the transcript written next to each audio file
    #[arg(
        long,
        env = "RESCRIBE_ARTIFACT_EXTENSION",
        default_value = DirectorySource::DEFAULT_ARTIFACT_EXTENSION
    )]
    pub artifact_extension: String,

    /// Skip directories containing a file with this name
    #[arg(long, env = "RESCRIBE_SKIP_MARKER")]
    pub skip_marker: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "RESCRIBE_VERBOSE")]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "RESCRIBE_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn source(&self) -> DirectorySource {
        let source = DirectorySource::new()
            .with_extensions(&self.extensions)
            .with_artifact_extension(&self.artifact_extension);
        match &self.skip_marker {
            Some(marker) => source.with_skip_marker(marker.clone()),
            None => source,
        }
    }

    pub fn engine(&self) -> CommandEngine {
        CommandEngine::new(&self.engine).with_args(self.engine_args.iter())
    }
}
