//! Atom Implementation
//!
//! An Atom is the unit of observable state. One structure serves both roles:
//! a primitive atom holds a value directly and is settable; a derived atom
//! holds a value computed from other atoms and is read-only. Which role an
//! atom plays is fixed at construction by a kind tag, not by a type
//! hierarchy — both kinds share the same `get`/`subscribe` surface.
//!
//! # How Atoms Work
//!
//! 1. Writing a primitive atom updates its value and synchronously notifies
//!    its observers: dependency-edge watchers first, then external
//!    subscribers in insertion order.
//!
//! 2. A derived atom read inside another derived atom's computation is
//!    recorded as a dependency of that computation (see `context`).
//!
//! 3. While a derived atom has at least one observer it is "active": it
//!    holds live subscriptions to its own dependencies, and pushes to its
//!    observers when its value changes. With no observers it holds nothing
//!    and recomputes on demand.
//!
//! # Thread Safety
//!
//! Atom state lives behind `parking_lot` locks and handles are `Clone`,
//! sharing state through an `Arc`. Dependency tracking and recompute
//! scheduling are thread-local: the runtime is designed for single-threaded
//! cooperative use, and locks are held only for field access, never across a
//! callback.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context::TrackingScope;
use super::derived::DerivedState;
use super::error::AtomError;
use super::subscriber::{AtomId, Source, SubscriberFn, Subscription, WatcherFn};

/// The kind of an atom, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    /// Holds a value directly; settable and resettable.
    Primitive,
    /// Holds a value computed from other atoms; read-only.
    Derived,
}

/// A unit of observable state, primitive or derived.
///
/// # Example
///
/// ```
/// use covalent_core::{atom, derived};
///
/// let count = atom(2);
/// let doubled = {
///     let count = count.clone();
///     derived(move || count.get() * 2)
/// };
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5).unwrap();
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) core: Arc<AtomCore<T>>,
}

/// Registry of external subscribers, in insertion order.
pub(crate) struct SubscriberRegistry<T: ?Sized> {
    next_key: u64,
    pub(crate) entries: IndexMap<u64, Arc<T>>,
}

impl<T: ?Sized> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self {
            next_key: 0,
            entries: IndexMap::new(),
        }
    }
}

/// Shared state behind every atom handle.
pub(crate) struct AtomCore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) id: AtomId,
    /// Current value. For derived atoms this is a memoized result, not a
    /// source of truth.
    pub(crate) value: RwLock<T>,
    /// External subscribers.
    pub(crate) subscribers: Mutex<SubscriberRegistry<dyn Fn(&T) + Send + Sync>>,
    /// Downstream dependency-edge watchers, keyed by the downstream atom's
    /// ID, in attach order.
    pub(crate) watchers: Mutex<IndexMap<AtomId, WatcherFn>>,
    pub(crate) kind: KindState<T>,
    /// Back-reference for watcher and catch-up closures, which must not keep
    /// the atom alive on their own.
    pub(crate) self_weak: Weak<AtomCore<T>>,
}

pub(crate) enum KindState<T> {
    Primitive {
        /// Construction-time value, restored by `reset`.
        initial: T,
    },
    Derived(DerivedState<T>),
}

impl<T> Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a primitive atom holding `value`.
    pub fn new(value: T) -> Self {
        let core = Arc::new_cyclic(|self_weak| AtomCore {
            id: AtomId::new(),
            value: RwLock::new(value.clone()),
            subscribers: Mutex::new(SubscriberRegistry::default()),
            watchers: Mutex::new(IndexMap::new()),
            kind: KindState::Primitive { initial: value },
            self_weak: self_weak.clone(),
        });
        tracing::trace!(atom = core.id.raw(), "created primitive atom");
        Self { core }
    }

    /// Create a derived atom whose value is computed by `compute`.
    ///
    /// The computation runs once immediately, so `get` is valid before any
    /// observer exists. No dependency subscriptions are retained until the
    /// atom gains its first observer.
    pub fn derived<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        // A fresh frame shields any tracked computation in progress from the
        // construction-time reads; they belong to the new atom.
        let initial = {
            let _scope = TrackingScope::enter();
            compute()
        };
        let core = Arc::new_cyclic(|self_weak| AtomCore {
            id: AtomId::new(),
            value: RwLock::new(initial),
            subscribers: Mutex::new(SubscriberRegistry::default()),
            watchers: Mutex::new(IndexMap::new()),
            kind: KindState::Derived(DerivedState::new(compute)),
            self_weak: self_weak.clone(),
        });
        tracing::trace!(atom = core.id.raw(), "created derived atom");
        Self { core }
    }

    /// Get the current value.
    ///
    /// Total and consistent with the atom's transitive dependencies at the
    /// time of the call: a derived atom with no observers recomputes on
    /// demand, and one inside a coalescing window catches up first. Inside a
    /// tracked computation, the read is recorded as a dependency.
    pub fn get(&self) -> T {
        if TrackingScope::is_active() {
            TrackingScope::record(self.core.clone());
        }
        self.core.read_value()
    }

    /// Set the value of a primitive atom, then notify every observer.
    ///
    /// There is no equality check: every `set` notifies, even with an
    /// unchanged value — a write signals intent to notify.
    ///
    /// # Errors
    ///
    /// [`AtomError::DerivedWrite`] if this atom is derived.
    pub fn set(&self, value: T) -> Result<(), AtomError> {
        self.core.write(value)
    }

    /// Update a primitive atom through a function of its current value.
    ///
    /// # Errors
    ///
    /// [`AtomError::DerivedWrite`] if this atom is derived.
    pub fn update<F>(&self, f: F) -> Result<(), AtomError>
    where
        F: FnOnce(&T) -> T,
    {
        if self.core.derived_state().is_some() {
            return Err(AtomError::DerivedWrite);
        }
        let next = {
            let current = self.core.value.read();
            f(&current)
        };
        self.core.write(next)
    }

    /// Restore a primitive atom to its construction-time value, then notify
    /// every observer.
    ///
    /// # Errors
    ///
    /// [`AtomError::DerivedWrite`] if this atom is derived.
    pub fn reset(&self) -> Result<(), AtomError> {
        match &self.core.kind {
            KindState::Primitive { initial } => self.core.write(initial.clone()),
            KindState::Derived(_) => Err(AtomError::DerivedWrite),
        }
    }

    /// Register `callback` for change notifications.
    ///
    /// If `notify_immediately` is true, the callback is invoked with the
    /// current value before this method returns. The first subscriber on a
    /// derived atom activates it (live dependency subscriptions are
    /// established); the last teardown deactivates it again.
    pub fn subscribe<F>(&self, callback: F, notify_immediately: bool) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(callback), notify_immediately)
    }

    /// [`subscribe`](Atom::subscribe) for a shared callback.
    ///
    /// A callback already registered on this atom (the same `Arc`) is not
    /// added twice; it keeps its original notification slot.
    pub fn subscribe_arc(&self, callback: SubscriberFn<T>, notify_immediately: bool) -> Subscription {
        let subscription = self.core.add_subscriber(callback.clone());
        if notify_immediately {
            let value = self.core.read_value();
            callback(&value);
        }
        subscription
    }

    /// Number of external subscribers. Dependency-edge subscriptions held by
    /// downstream derived atoms are not counted.
    pub fn subscriber_count(&self) -> usize {
        self.core.subscribers.lock().entries.len()
    }

    /// Number of live upstream dependency subscriptions. Zero for primitive
    /// atoms, and for derived atoms with no observers.
    pub fn dependency_count(&self) -> usize {
        match self.core.derived_state() {
            Some(state) => state.edges.lock().len(),
            None => 0,
        }
    }

    /// The atom's kind, fixed at construction.
    pub fn kind(&self) -> AtomKind {
        match self.core.kind {
            KindState::Primitive { .. } => AtomKind::Primitive,
            KindState::Derived(_) => AtomKind::Derived,
        }
    }

    /// The atom's unique ID.
    pub fn id(&self) -> AtomId {
        self.core.id
    }
}

impl<T> AtomCore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn derived_state(&self) -> Option<&DerivedState<T>> {
        match &self.kind {
            KindState::Derived(state) => Some(state),
            KindState::Primitive { .. } => None,
        }
    }

    /// Whether anything observes this atom — external subscriber or
    /// downstream watcher. Derived atoms hold dependency edges exactly while
    /// observed.
    pub(crate) fn is_observed(&self) -> bool {
        !self.subscribers.lock().entries.is_empty() || !self.watchers.lock().is_empty()
    }

    fn write(&self, value: T) -> Result<(), AtomError> {
        if self.derived_state().is_some() {
            return Err(AtomError::DerivedWrite);
        }
        {
            let mut guard = self.value.write();
            *guard = value;
        }
        tracing::trace!(atom = self.id.raw(), "primitive write");
        // Watchers first: downstream derived atoms settle before external
        // subscribers observe the graph.
        self.ping_watchers();
        self.notify_subscribers();
        Ok(())
    }

    /// Invoke downstream dependency-edge watchers, in attach order.
    /// Callbacks run with no locks held.
    pub(crate) fn ping_watchers(&self) {
        let pings: SmallVec<[WatcherFn; 4]> = self.watchers.lock().values().cloned().collect();
        for ping in pings {
            ping();
        }
    }

    /// Invoke external subscribers with the current value, in insertion
    /// order. Callbacks run with no locks held.
    pub(crate) fn notify_subscribers(&self) {
        let callbacks: SmallVec<[SubscriberFn<T>; 4]> =
            self.subscribers.lock().entries.values().cloned().collect();
        if callbacks.is_empty() {
            return;
        }
        let value = self.value.read().clone();
        for callback in callbacks {
            callback(&value);
        }
    }

    fn add_subscriber(&self, callback: SubscriberFn<T>) -> Subscription {
        let was_observed = self.is_observed();
        let key = {
            let mut registry = self.subscribers.lock();
            let existing = registry
                .entries
                .iter()
                .find_map(|(key, existing)| Arc::ptr_eq(existing, &callback).then_some(*key));
            match existing {
                Some(key) => key,
                None => {
                    let key = registry.next_key;
                    registry.next_key += 1;
                    registry.entries.insert(key, callback);
                    key
                }
            }
        };
        if !was_observed {
            self.activate();
        }

        let weak = self.self_weak.clone();
        Subscription::new(move || {
            if let Some(core) = weak.upgrade() {
                core.remove_subscriber(key);
            }
        })
    }

    fn remove_subscriber(&self, key: u64) {
        // shift_remove keeps the remaining insertion order intact.
        let removed = self.subscribers.lock().entries.shift_remove(&key).is_some();
        if removed && !self.is_observed() {
            self.deactivate();
        }
    }
}

impl<T> Drop for AtomCore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Watchers hold only weak back-references, so a derived atom can be
        // dropped while attached; detach here so upstream atoms do not
        // accumulate dead edges (and can deactivate).
        if let Some(state) = self.derived_state() {
            state.teardown_edges(self.id);
        }
    }
}

impl<T> Source for AtomCore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn source_id(&self) -> AtomId {
        self.id
    }

    fn attach(&self, watcher: AtomId, on_change: WatcherFn) {
        let was_observed = self.is_observed();
        self.watchers.lock().insert(watcher, on_change);
        if !was_observed {
            self.activate();
        }
    }

    fn detach(&self, watcher: AtomId) {
        let removed = self.watchers.lock().shift_remove(&watcher).is_some();
        if removed && !self.is_observed() {
            self.deactivate();
        }
    }
}

impl<T> Clone for Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for Atom<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.core.id.raw())
            .field("kind", &self.kind())
            .field("value", &*self.core.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
