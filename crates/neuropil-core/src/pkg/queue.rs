//! Fan-in completion barrier.
//!
//! The set of outstanding operations grows while the run is in flight: every
//! installer may discover more work. The queue succeeds once the outstanding
//! count reaches zero and fails as soon as any operation reports an error.

use super::error::PkgError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

type Outcome = Result<(), PkgError>;

#[derive(Debug)]
struct QueueState {
    outstanding: usize,
    failed: bool,
    done: Option<oneshot::Sender<Outcome>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, result: Outcome) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);

        if state.failed {
            return;
        }

        match result {
            Err(err) => {
                state.failed = true;
                if let Some(tx) = state.done.take() {
                    let _ = tx.send(Err(err));
                }
            }
            Ok(()) if state.outstanding == 0 => {
                if let Some(tx) = state.done.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(()) => {}
        }
    }
}

/// Registration side of the barrier. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CompletionQueue {
    shared: Arc<Shared>,
}

/// Resolves once with the overall outcome.
#[derive(Debug)]
pub struct CompletionOutcome {
    rx: oneshot::Receiver<Outcome>,
}

/// One registered operation. Completing consumes the handle; dropping it
/// without completing reports [`PkgError::Abandoned`].
#[derive(Debug)]
#[must_use = "a dropped handle fails the run"]
pub struct CompletionHandle {
    shared: Option<Arc<Shared>>,
    label: String,
}

impl CompletionQueue {
    /// Create an empty queue and the receiver for its outcome.
    #[must_use]
    pub fn new() -> (Self, CompletionOutcome) {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                outstanding: 0,
                failed: false,
                done: Some(tx),
            }),
        });
        (Self { shared }, CompletionOutcome { rx })
    }

    /// Register one more outstanding operation.
    pub fn register(&self, label: impl Into<String>) -> CompletionHandle {
        self.shared.lock().outstanding += 1;
        CompletionHandle {
            shared: Some(Arc::clone(&self.shared)),
            label: label.into(),
        }
    }

    /// Whether some operation has already failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.shared.lock().failed
    }

    /// Number of operations still outstanding.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }
}

impl CompletionHandle {
    /// Report this operation's result.
    pub fn complete(mut self, result: Result<(), PkgError>) {
        if let Some(shared) = self.shared.take() {
            shared.finish(result);
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.finish(Err(PkgError::abandoned(format!(
                "{} stopped before completing",
                self.label
            ))));
        }
    }
}

impl CompletionOutcome {
    /// Wait for the overall outcome.
    ///
    /// # Errors
    /// Returns the first reported error.
    pub async fn wait(self) -> Result<(), PkgError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(PkgError::abandoned("completion queue dropped")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_succeeds_at_zero() {
        let (queue, outcome) = CompletionQueue::new();
        let a = queue.register("a");
        let b = queue.register("b");
        assert_eq!(queue.outstanding(), 2);

        a.complete(Ok(()));
        let c = queue.register("c");
        b.complete(Ok(()));
        c.complete(Ok(()));

        assert_eq!(queue.outstanding(), 0);
        assert!(outcome.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let (queue, outcome) = CompletionQueue::new();
        let a = queue.register("a");
        let b = queue.register("b");
        let c = queue.register("c");

        b.complete(Err(PkgError::not_found("b")));
        assert!(queue.is_failed());
        c.complete(Err(PkgError::not_found("c")));
        a.complete(Ok(()));

        assert_eq!(outcome.wait().await, Err(PkgError::not_found("b")));
    }

    #[tokio::test]
    async fn test_fails_before_others_finish() {
        let (queue, outcome) = CompletionQueue::new();
        let slow = queue.register("slow");
        queue
            .register("fast")
            .complete(Err(PkgError::tarball_fetch("http://r/x.tgz", 500)));

        let err = outcome.wait().await.unwrap_err();
        assert_eq!(err.code(), "PKG_TARBALL_FETCH_FAILED");
        slow.complete(Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_handle_is_abandoned() {
        let (queue, outcome) = CompletionQueue::new();
        let handle = queue.register("pkgA@^1.0.0");
        drop(handle);

        let err = outcome.wait().await.unwrap_err();
        assert_eq!(err.code(), "PKG_INSTALL_ABANDONED");
        assert!(err.to_string().contains("pkgA@^1.0.0"));
    }

    #[tokio::test]
    async fn test_dropped_queue_without_work() {
        let (queue, outcome) = CompletionQueue::new();
        drop(queue);
        assert!(outcome.wait().await.is_err());
    }
}
