//! The purpose of this module is to alleviate the need to import many of the `[rescribe]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use rescribe::prelude::*;
//! ```
pub use crate::engine::{EngineError, TranscriptionEngine};
pub use crate::guard::ResourceGuard;
pub use crate::job::{Job, JobId, JobStatus, Progress};
pub use crate::source::{AudioSource, DirectorySource, SourceError};
pub use crate::store::{JobStore, StoreError};
pub use crate::{Rescribe, RescribeError};
