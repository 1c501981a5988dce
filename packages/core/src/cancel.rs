//! Tree-structured cancellation tokens.
//!
//! A `CancelToken` is a node in a cancellation tree. Cancelling a node marks
//! that node and every descendant as cancelled; ancestors and siblings are
//! unaffected. Waiters suspend on a `tokio::sync::watch` broadcast rather
//! than polling a flag.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

/// One node in a cancellation tree.
///
/// Cloning a token is cheap and yields a handle to the *same* node: all
/// clones observe (and can fire) the same signal. Use [`CancelToken::child`]
/// to derive a new node that additionally observes every ancestor.
///
/// Cancellation is a one-way latch: once a token is cancelled it stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    signal: watch::Sender<bool>,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// Creates a root token with no parent, initially not cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                signal,
                parent: None,
            }),
        }
    }

    /// Derives a child token.
    ///
    /// The child becomes cancelled when either its own [`cancel`] fires or
    /// any ancestor's does. Cancelling the child never affects the parent.
    ///
    /// [`cancel`]: CancelToken::cancel
    #[must_use]
    pub fn child(&self) -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                signal,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Fires this node's signal, cancelling it and every descendant.
    ///
    /// Idempotent: firing an already-cancelled token is a no-op.
    pub fn cancel(&self) {
        let was_cancelled = self.inner.signal.send_replace(true);
        if !was_cancelled {
            trace!("cancel token fired");
        }
    }

    /// Returns `true` if this node or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if *self.inner.signal.borrow() {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    /// Suspends until this token is cancelled.
    ///
    /// Resolves immediately if the token is already cancelled. The wait is a
    /// broadcast subscription raced against the parent's wait, so no task
    /// ever spins on the flag.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.signal.subscribe();
        match &self.inner.parent {
            Some(parent) => {
                tokio::select! {
                    _ = rx.wait_for(|cancelled| *cancelled) => {}
                    () = Box::pin(parent.cancelled()) => {}
                }
            }
            None => {
                // The sender lives in `self.inner`, so the wait cannot
                // observe a closed channel while `self` is alive.
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
