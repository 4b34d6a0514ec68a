//! The HTTP front of [`rescribe`].
//!
//! [`router`] exposes a [`Rescribe`](rescribe::Rescribe) over JSON, [`CommandEngine`] adapts an
//! external speech recognition program into a [`TranscriptionEngine`](rescribe::prelude::TranscriptionEngine),
//! and [`Config`] holds the command line configuration of the binary.
pub mod config;
pub mod engine;
pub mod routes;

pub use config::Config;
pub use engine::CommandEngine;
pub use routes::router;
