//! Subscriber plumbing for the atom runtime.
//!
//! Two kinds of observers exist:
//!
//! - External subscribers, registered through `Atom::subscribe`. They receive
//!   the atom's new value and are notified in insertion order.
//! - Watchers, the internal endpoints of dependency edges. A derived atom
//!   attaches a watcher to each atom it read during its last computation.
//!   Watchers carry no value; the downstream atom re-reads its dependencies
//!   when it recomputes.
//!
//! `Atom::subscriber_count` reports external subscribers only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Unique identifier for an atom.
///
/// Doubles as the watcher key: a derived atom attaches to its dependencies
/// under its own ID, so an edge can be detached without holding a direct
/// reference to the downstream atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomId(u64);

impl AtomId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// External subscriber callback, invoked with the atom's new value.
pub type SubscriberFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Internal dependency-edge callback.
pub(crate) type WatcherFn = Arc<dyn Fn() + Send + Sync>;

/// Type-erased upstream endpoint of a dependency edge.
///
/// A derived atom's dependencies hold values of arbitrary types; the edge
/// map stores them behind this trait and manages subscriptions by ID.
pub(crate) trait Source: Send + Sync {
    fn source_id(&self) -> AtomId;

    /// Attach a change watcher under `watcher`. Must not invoke `on_change`
    /// synchronously.
    fn attach(&self, watcher: AtomId, on_change: WatcherFn);

    /// Detach the watcher registered under `watcher`, if any.
    fn detach(&self, watcher: AtomId);
}

/// Handle returned by `Atom::subscribe`.
///
/// Teardown is explicit: dropping the handle does not unsubscribe. The
/// handle holds only a weak reference to the atom, so keeping it around
/// never extends the atom's lifetime.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Remove the subscriber. Safe to call more than once; only the first
    /// call has an effect.
    pub fn unsubscribe(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel();
        }
    }

    /// Whether `unsubscribe` has already run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn atom_ids_are_unique() {
        let id1 = AtomId::new();
        let id2 = AtomId::new();
        let id3 = AtomId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn unsubscribe_runs_cancel_once() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let subscription = Subscription::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!subscription.is_cancelled());

        subscription.unsubscribe();
        assert!(subscription.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Further calls are no-ops.
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_a_subscription_does_not_cancel() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let subscription = Subscription::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
