//! A cancel-safe, rearmable single timer over `tokio::time` (§5:
//! "Cancellation").
//!
//! Grounded on the teacher's own `tokio::spawn` + `tokio::time::sleep`
//! background-loop pattern (e.g. `node::node::Node`'s cover-traffic loop),
//! generalized into a reusable primitive: each `arm` invalidates whatever
//! was previously armed, and an explicitly cancelled timer's callback never
//! runs even if it was already sleeping when `cancel` was called — the
//! specification's "operation-aborted is ignored by every timer callback"
//! rule, implemented with a generation counter rather than a real OS-level
//! cancellation token.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A single rearmable, cancellable timer.
///
/// One `Timer` holds at most one pending callback at a time; arming it
/// again (or cancelling it) invalidates whatever was previously pending.
/// Used for the handshake retry timer and the heartbeat cadence timer
/// (§4.3, §4.5); the deferred-destruction timer intentionally does **not**
/// use this type (see [`spawn_irrevocable`]).
#[derive(Clone, Default)]
pub struct Timer {
    generation: Arc<AtomicU64>,
}

impl Timer {
    /// Create a new, unarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to invoke `callback` after `delay`. Any callback
    /// previously armed on this `Timer` (fired or not) is invalidated: if
    /// it is still sleeping when this call returns, it will observe a
    /// generation mismatch and no-op instead of running.
    pub fn arm<F, Fut>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = Arc::clone(&self.generation);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if guard.load(Ordering::SeqCst) == generation {
                callback().await;
            }
        });
    }

    /// Cancel whatever is currently armed. A no-op if nothing is armed.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Spawn a one-shot delayed callback that cannot be cancelled. Used for the
/// deferred-destruction timer (§4.1, §5): "once armed, destruction is
/// inevitable."
pub fn spawn_irrevocable<F, Fut>(delay: Duration, callback: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        callback().await;
    });
}
