use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinError;

use crate::engine::TranscriptionEngine;

/// Exclusive access to the one shared [`TranscriptionEngine`].
///
/// Every job in the process shares a single engine through clones of the same guard, so at most
/// one file is transcribed at a time no matter how many jobs are processing. Callers waiting for
/// the engine are served in whatever order the underlying mutex wakes them.
pub struct ResourceGuard<E> {
    engine: Arc<Mutex<E>>,
}

impl<E> Clone for ResourceGuard<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<E> ResourceGuard<E>
where
    E: TranscriptionEngine,
{
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Runs `f` with exclusive ownership of the engine, blocking until it is available.
    ///
    /// The engine is released when `f` returns or unwinds. A panic inside `f` does not lock other
    /// callers out: the poisoned state is cleared and the next caller gets the engine as `f` left
    /// it.
    pub fn with_exclusive_access<T>(&self, f: impl FnOnce(&mut E) -> T) -> T {
        let mut engine = self.engine.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovering transcription engine after a panicked call");
            self.engine.clear_poison();
            PoisonError::into_inner(poisoned)
        });
        f(&mut engine)
    }

    /// Like [`ResourceGuard::with_exclusive_access`] but waits on tokio's blocking thread pool.
    ///
    /// A panic inside `f` is returned as the [`JoinError`].
    pub async fn run_exclusive<T>(
        &self,
        f: impl FnOnce(&mut E) -> T + Send + 'static,
    ) -> Result<T, JoinError>
    where
        T: Send + 'static,
    {
        let guard = self.clone();
        tokio::task::spawn_blocking(move || guard.with_exclusive_access(f)).await
    }
}
