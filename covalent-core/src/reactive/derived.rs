//! Derived Atom Machinery
//!
//! A derived atom caches the result of a compute closure over other atoms.
//! Every computation pass rebuilds the dependency set from what the closure
//! actually read, so dependencies may change shape between passes.
//!
//! # Computation pass
//!
//! 1. Set the `computing` flag (reentrancy guard) and clear `dirty`.
//! 2. Run the compute closure inside a tracking scope; collect its reads.
//! 3. Compare the result against the cache; swap it in if different.
//! 4. Clear `computing`.
//! 5. If the atom is observed, reconcile the live edge set against the
//!    reads: detach edges that were not read this pass, attach edges for
//!    newly read atoms. If unobserved, tear down any leftover edges.
//! 6. If the value changed, ping downstream watchers and (when requested)
//!    notify external subscribers.
//!
//! # Coalescing
//!
//! A dependency change arriving while the atom is idle recomputes and
//! notifies immediately, and books a catch-up task for the next flush
//! checkpoint. Changes arriving while a pass is in flight, or while the
//! catch-up is already booked, only mark the atom `dirty`; the catch-up
//! performs one final pass reflecting the latest upstream state. A burst of
//! N upstream writes therefore produces at most two notifications per tick,
//! never N.

use std::sync::Arc;

use parking_lot::Mutex;

use super::atom::AtomCore;
use super::context::{ReadSet, TrackingScope};
use super::scheduler;
use super::subscriber::{Source, WatcherFn};

/// Per-derived-atom state.
pub(crate) struct DerivedState<T> {
    /// The computation. Must be pure: deterministic in its tracked reads.
    compute: Box<dyn Fn() -> T + Send + Sync>,
    /// Coalescing flags.
    pub(crate) flags: Mutex<RecomputeFlags>,
    /// Live upstream edges while observed, in read order. Keys equal the
    /// read set of the most recent successful pass.
    pub(crate) edges: Mutex<ReadSet>,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RecomputeFlags {
    /// A computation pass is in flight.
    pub(crate) computing: bool,
    /// A catch-up task is booked for the next flush checkpoint.
    pub(crate) scheduled: bool,
    /// A dependency changed while a pass was in flight or already booked.
    pub(crate) dirty: bool,
}

impl<T> DerivedState<T> {
    pub(crate) fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            compute: Box::new(compute),
            flags: Mutex::new(RecomputeFlags::default()),
            edges: Mutex::new(ReadSet::new()),
        }
    }

    /// Detach every live edge. Runs the detachments with no locks held, so
    /// upstream atoms may cascade their own deactivation.
    pub(crate) fn teardown_edges(&self, downstream: super::subscriber::AtomId) {
        let edges: Vec<Arc<dyn Source>> = {
            let mut edges = self.edges.lock();
            edges.drain(..).map(|(_, source)| source).collect()
        };
        for source in edges {
            source.detach(downstream);
        }
    }
}

/// Clears the `computing` flag even if the compute closure panics.
struct ComputingGuard<'a> {
    flags: &'a Mutex<RecomputeFlags>,
}

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.flags.lock().computing = false;
    }
}

impl<T> AtomCore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Read the current value, keeping it consistent with upstream state.
    ///
    /// Primitive atoms just read the cell. An unobserved derived atom has no
    /// push keeping its cache fresh, so it recomputes on demand; an observed
    /// one returns the cache, catching up first if a coalesced recompute is
    /// still pending.
    pub(crate) fn read_value(&self) -> T {
        let Some(state) = self.derived_state() else {
            return self.value.read().clone();
        };

        if state.flags.lock().computing {
            // Re-entrant read during this atom's own computation; return the
            // cache rather than recursing.
            return self.value.read().clone();
        }

        if self.is_observed() {
            let dirty = state.flags.lock().dirty;
            if dirty {
                self.recompute(true);
            }
        } else {
            self.recompute(true);
        }
        self.value.read().clone()
    }

    /// One computation pass. See the module docs for the step sequence.
    pub(crate) fn recompute(&self, notify: bool) {
        let Some(state) = self.derived_state() else {
            return;
        };

        {
            let mut flags = state.flags.lock();
            if flags.computing {
                return;
            }
            flags.computing = true;
            // This pass reads the latest upstream state; pending dirtiness
            // is consumed by it.
            flags.dirty = false;
        }
        let computing = ComputingGuard {
            flags: &state.flags,
        };

        let scope = TrackingScope::enter();
        let new_value = (state.compute)();
        let mut reads = scope.take_reads();
        drop(scope);

        // A computation reading its own cache does not form an edge.
        reads.shift_remove(&self.id);

        let changed = {
            let mut value = self.value.write();
            let changed = *value != new_value;
            if changed {
                *value = new_value;
            }
            changed
        };

        drop(computing);

        if self.is_observed() {
            self.reconcile_edges(reads);
        } else {
            state.teardown_edges(self.id);
        }

        tracing::trace!(atom = self.id.raw(), changed, "recomputed derived atom");

        if changed {
            self.ping_watchers();
            if notify {
                self.notify_subscribers();
            }
        }
    }

    /// Make the live edge set exactly equal to the reads of the latest pass.
    fn reconcile_edges(&self, reads: ReadSet) {
        let Some(state) = self.derived_state() else {
            return;
        };
        let (stale, fresh) = {
            let mut edges = state.edges.lock();
            let stale: Vec<Arc<dyn Source>> = edges
                .iter()
                .filter(|(id, _)| !reads.contains_key(*id))
                .map(|(_, source)| source.clone())
                .collect();
            let fresh: Vec<Arc<dyn Source>> = reads
                .values()
                .filter(|source| !edges.contains_key(&source.source_id()))
                .cloned()
                .collect();
            *edges = reads;
            (stale, fresh)
        };
        for source in stale {
            source.detach(self.id);
        }
        for source in fresh {
            source.attach(self.id, self.change_watcher());
        }
    }

    fn change_watcher(&self) -> WatcherFn {
        let weak = self.self_weak.clone();
        Arc::new(move || {
            if let Some(core) = weak.upgrade() {
                core.dependency_changed();
            }
        })
    }

    /// A dependency edge fired: recompute now or coalesce, per the flag
    /// machine in the module docs.
    pub(crate) fn dependency_changed(&self) {
        let Some(state) = self.derived_state() else {
            return;
        };
        let (book_catch_up, run_now) = {
            let mut flags = state.flags.lock();
            if flags.computing || flags.scheduled {
                flags.dirty = true;
                let book = !flags.scheduled;
                flags.scheduled = true;
                (book, false)
            } else {
                flags.scheduled = true;
                (true, true)
            }
        };
        if book_catch_up {
            let weak = self.self_weak.clone();
            scheduler::enqueue(move || {
                if let Some(core) = weak.upgrade() {
                    core.catch_up();
                }
            });
        }
        if run_now {
            self.recompute(true);
        }
    }

    /// Deferred tail of the coalescing window.
    fn catch_up(&self) {
        let Some(state) = self.derived_state() else {
            return;
        };
        let dirty = {
            let mut flags = state.flags.lock();
            flags.scheduled = false;
            flags.dirty
        };
        if dirty {
            self.recompute(true);
        }
    }

    /// First observer arrived: run a computation pass that establishes live
    /// dependency subscriptions. No notification — a subscriber arriving
    /// with `notify_immediately` receives the value through that path.
    pub(crate) fn activate(&self) {
        if self.derived_state().is_some() {
            tracing::debug!(atom = self.id.raw(), "activating derived atom");
            self.recompute(false);
        }
    }

    /// Last observer left: drop every dependency subscription so nothing
    /// upstream keeps pushing into (or holding onto) this atom.
    pub(crate) fn deactivate(&self) {
        let Some(state) = self.derived_state() else {
            return;
        };
        tracing::debug!(atom = self.id.raw(), "deactivating derived atom");
        state.teardown_edges(self.id);
        state.flags.lock().dirty = false;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::atom::Atom;
    use super::super::scheduler;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn derived_computes_at_construction() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let d = Atom::derived(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(d.get(), 42);
    }

    #[test]
    fn unobserved_derived_recomputes_on_every_get() {
        let a = Atom::new(1);
        let a_clone = a.clone();
        let d = Atom::derived(move || a_clone.get() * 10);

        assert_eq!(d.get(), 10);
        a.set(3).unwrap();
        assert_eq!(d.get(), 30);
        assert_eq!(d.dependency_count(), 0);
    }

    #[test]
    fn observed_derived_serves_from_cache() {
        let calls = Arc::new(AtomicI32::new(0));
        let a = Atom::new(1);

        let a_clone = a.clone();
        let calls_clone = calls.clone();
        let d = Atom::derived(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            a_clone.get() * 10
        });

        let _sub = d.subscribe(|_| {}, false);
        let after_activation = calls.load(Ordering::SeqCst);

        // Reads are served from the cache while the push subscriptions keep
        // it fresh.
        assert_eq!(d.get(), 10);
        assert_eq!(d.get(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), after_activation);
    }

    #[test]
    fn activation_establishes_edges_and_deactivation_drops_them() {
        let a = Atom::new(1);
        let b = Atom::new(2);

        let (a_clone, b_clone) = (a.clone(), b.clone());
        let sum = Atom::derived(move || a_clone.get() + b_clone.get());
        assert_eq!(sum.dependency_count(), 0);

        let sub = sum.subscribe(|_| {}, false);
        assert_eq!(sum.dependency_count(), 2);

        sub.unsubscribe();
        assert_eq!(sum.dependency_count(), 0);
        assert_eq!(sum.get(), 3);
    }

    #[test]
    fn dynamic_dependencies_are_rebuilt_each_pass() {
        let flag = Atom::new(true);
        let a = Atom::new(10);
        let b = Atom::new(20);

        let (flag_clone, a_clone, b_clone) = (flag.clone(), a.clone(), b.clone());
        let dynamic = Atom::derived(move || {
            if flag_clone.get() {
                a_clone.get()
            } else {
                b_clone.get()
            }
        });

        let _sub = dynamic.subscribe(|_| {}, false);
        assert_eq!(dynamic.dependency_count(), 2); // flag + a

        flag.set(false).unwrap();
        scheduler::flush();
        assert_eq!(dynamic.dependency_count(), 2); // flag + b
        assert_eq!(dynamic.get(), 20);
    }

    #[test]
    fn derived_only_notifies_downstream_on_actual_change() {
        let a = Atom::new(1);

        let a_clone = a.clone();
        let clamped = Atom::derived(move || a_clone.get().min(5));

        let notifications = Arc::new(AtomicI32::new(0));
        let notifications_clone = notifications.clone();
        let _sub = clamped.subscribe(
            move |_| {
                notifications_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        a.set(3).unwrap();
        scheduler::flush();
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        // 7 and 9 both clamp to 5; the first write changes the value (3->5),
        // the second recomputes to an equal value and stays silent.
        a.set(7).unwrap();
        scheduler::flush();
        assert_eq!(notifications.load(Ordering::SeqCst), 2);

        a.set(9).unwrap();
        scheduler::flush();
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
        assert_eq!(clamped.get(), 5);
    }

    #[test]
    fn burst_of_writes_coalesces_to_two_notifications() {
        let a = Atom::new(0);
        let a_clone = a.clone();
        let doubled = Atom::derived(move || a_clone.get() * 2);

        let notifications = Arc::new(AtomicI32::new(0));
        let notifications_clone = notifications.clone();
        let _sub = doubled.subscribe(
            move |_| {
                notifications_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        a.set(1).unwrap();
        a.set(2).unwrap();
        a.set(3).unwrap();
        scheduler::flush();

        assert_eq!(doubled.get(), 6);
        // One immediate notification for the first write, one coalesced
        // catch-up for the rest.
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn get_inside_a_coalescing_window_is_not_stale() {
        let a = Atom::new(0);
        let a_clone = a.clone();
        let doubled = Atom::derived(move || a_clone.get() * 2);

        let _sub = doubled.subscribe(|_| {}, false);

        a.set(1).unwrap();
        a.set(5).unwrap(); // coalesced; cache still holds 2
        assert_eq!(doubled.get(), 10);

        scheduler::flush();
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn write_from_inside_a_computation_defers_and_converges() {
        let a = Atom::new(0);

        let a_clone = a.clone();
        let clamped = Atom::derived(move || {
            let v = a_clone.get();
            if v > 3 {
                let _ = a_clone.set(3);
            }
            v
        });

        let notifications = Arc::new(AtomicI32::new(0));
        let notifications_clone = notifications.clone();
        let _sub = clamped.subscribe(
            move |_| {
                notifications_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        a.set(10).unwrap();
        scheduler::flush();

        assert_eq!(a.get(), 3);
        assert_eq!(clamped.get(), 3);
        // Immediate pass observed 10, catch-up pass observed the clamp.
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
    }
}
