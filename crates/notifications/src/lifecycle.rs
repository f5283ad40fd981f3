//! Start/stop plumbing shared by the background tasks.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long [`Worker::stop`] waits for the loop to exit.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// A named, cancellable background loop that runs at most once at a time.
pub struct Worker {
    name: &'static str,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Worker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn `run` with a fresh cancellation token.
    ///
    /// Returns `false` without spawning if the loop is already running.
    pub fn start<F, Fut>(&self, run: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            tracing::debug!(worker = self.name, "Already running");
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        *running = Some((cancel, handle));
        tracing::info!(worker = self.name, "Started");
        true
    }

    /// Cancel the loop and wait up to [`STOP_TIMEOUT`] for it to exit.
    pub async fn stop(&self) {
        let Some((cancel, handle)) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        cancel.cancel();
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => tracing::info!(worker = self.name, "Stopped"),
            Ok(Err(e)) => tracing::error!(worker = self.name, error = %e, "Task failed"),
            Err(_) => tracing::warn!(
                worker = self.name,
                timeout_secs = STOP_TIMEOUT.as_secs(),
                "Timed out waiting for task to stop",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn start_is_guarded_and_stop_joins() {
        let worker = Worker::new("test");
        let exits = Arc::new(AtomicUsize::new(0));

        let counter = exits.clone();
        assert!(worker.start(move |cancel| async move {
            cancel.cancelled().await;
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(worker.is_running());
        assert!(!worker.start(|_| async {}));

        worker.stop().await;
        assert!(!worker.is_running());
        assert_eq!(exits.load(Ordering::SeqCst), 1);

        // Restartable after a stop; stopping twice is harmless.
        assert!(worker.start(|cancel| async move { cancel.cancelled().await }));
        worker.stop().await;
        worker.stop().await;
    }
}
