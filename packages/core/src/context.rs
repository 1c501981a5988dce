//! Immutable, derivable request contexts.
//!
//! A [`Context`] carries three things down a call chain: typed value
//! attachments, an optional deadline, and a cancellation signal. Contexts
//! are never mutated; each boundary that needs a tighter deadline or an
//! extra attachment derives a new one, and whatever is done to a parent is
//! observable from every context derived from it.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::CancelToken;

/// An opaque, cheaply cloneable carrier of request-scoped state.
///
/// Derivations form a chain back to [`Context::background`]. Each node holds
/// at most one typed attachment plus the *effective* cancellation token and
/// deadline inherited from its ancestors, so lookups never re-walk the chain
/// for anything except values.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    parent: Option<Context>,
    token: Option<CancelToken>,
    deadline: Option<Instant>,
    value: Option<(TypeId, Arc<dyn Any + Send + Sync>)>,
}

/// Cancels the subtree created by [`Context::with_cancel`].
///
/// Cloneable; all clones fire the same token. Cancelling never affects the
/// context the subtree was derived from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancelToken,
}

impl CancelHandle {
    /// Marks the associated context, and everything derived from it, as done.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Context {
    /// The root context: no deadline, no cancellation, no attachments.
    ///
    /// Never done. Created once at the top of a call chain.
    #[must_use]
    pub fn background() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                parent: None,
                token: None,
                deadline: None,
                value: None,
            }),
        }
    }

    fn derive(
        &self,
        token: Option<CancelToken>,
        deadline: Option<Instant>,
        value: Option<(TypeId, Arc<dyn Any + Send + Sync>)>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                parent: Some(self.clone()),
                token,
                deadline,
                value,
            }),
        }
    }

    /// Derives a context carrying one typed attachment.
    ///
    /// The attachment is keyed by its type. A later attachment of the same
    /// type shadows an earlier one for contexts derived below it; the parent
    /// chain is untouched.
    #[must_use]
    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) -> Self {
        self.derive(
            self.inner.token.clone(),
            self.inner.deadline,
            Some((TypeId::of::<T>(), Arc::new(value))),
        )
    }

    /// Returns the nearest attachment of type `T`, walking toward the root.
    #[must_use]
    pub fn value<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let mut node = Some(self);
        while let Some(ctx) = node {
            if let Some((type_id, stored)) = &ctx.inner.value {
                if *type_id == TypeId::of::<T>() {
                    return Arc::clone(stored).downcast::<T>().ok();
                }
            }
            node = ctx.inner.parent.as_ref();
        }
        None
    }

    /// Derives a cancellable context.
    ///
    /// The returned [`CancelHandle`] marks the derived context, and every
    /// context derived from it, as done. The parent is never affected, and
    /// the derived context still observes the parent's own cancellation and
    /// deadline.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = match &self.inner.token {
            Some(parent) => parent.child(),
            None => CancelToken::new(),
        };
        let ctx = self.derive(Some(token.clone()), self.inner.deadline, None);
        (ctx, CancelHandle { token })
    }

    /// Derives a context that is done once `at` passes.
    ///
    /// Deadlines only tighten: if an ancestor already carries an earlier
    /// deadline, that one stays in effect. A deadline is fixed at derivation
    /// and cannot be extended or renewed.
    #[must_use]
    pub fn with_deadline(&self, at: Instant) -> Self {
        let effective = self.inner.deadline.map_or(at, |inherited| inherited.min(at));
        self.derive(self.inner.token.clone(), Some(effective), None)
    }

    /// Derives a context that is done once `after` elapses from now.
    #[must_use]
    pub fn with_timeout(&self, after: Duration) -> Self {
        self.with_deadline(Instant::now() + after)
    }

    /// The effective (earliest inherited) deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns `true` if the deadline has passed or cancellation has fired
    /// anywhere up the chain.
    #[must_use]
    pub fn is_done(&self) -> bool {
        if self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return true;
        }
        self.inner
            .token
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    /// Suspends until this context is done, whichever of deadline expiry or
    /// cancellation fires first.
    ///
    /// Resolves immediately if the context is already done. A root context
    /// with no deadline and no cancellation suspends forever.
    pub async fn done(&self) {
        let deadline = self.inner.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        match &self.inner.token {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = expired => {}
                }
            }
            None => expired.await,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("cancellable", &self.inner.token.is_some())
            .field("has_value", &self.inner.value.is_some())
            .finish_non_exhaustive()
    }
}
