//! Dependency tracking context.
//!
//! The tracking context records which atoms a computation reads. When a
//! derived atom recomputes, it enters a tracking scope; any `Atom::get`
//! executed on this thread while the scope is live registers the read atom
//! into the scope's frame. The resulting read set is the exact dependency
//! set of that computation, rebuilt from scratch on every pass — which is
//! what makes dynamic dependencies (an atom read in one pass and not the
//! next) fall out for free.
//!
//! # Implementation
//!
//! A thread-local stack holds one frame per computation in flight, so nested
//! computations (a derived atom reading another derived atom that has to
//! recompute on demand) each collect their own reads. The scope guard pops
//! its frame on drop, including during unwinding, so a panicking compute
//! closure cannot leave the stack unbalanced.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;

use super::subscriber::{AtomId, Source};

/// Reads collected by one computation, in first-read order.
pub(crate) type ReadSet = IndexMap<AtomId, Arc<dyn Source>>;

thread_local! {
    static TRACKING_STACK: RefCell<Vec<ReadSet>> = const { RefCell::new(Vec::new()) };
}

/// Guard for one tracked computation.
pub(crate) struct TrackingScope {
    depth: usize,
}

impl TrackingScope {
    /// Push a fresh frame and return its guard.
    pub(crate) fn enter() -> Self {
        let depth = TRACKING_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(ReadSet::new());
            stack.len()
        });
        Self { depth }
    }

    /// Record a read into the innermost frame, if any. Repeated reads of the
    /// same atom keep their first position.
    pub(crate) fn record(source: Arc<dyn Source>) {
        TRACKING_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                frame.entry(source.source_id()).or_insert(source);
            }
        });
    }

    /// Whether a tracked computation is running on this thread.
    pub(crate) fn is_active() -> bool {
        TRACKING_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Take the reads collected so far in this scope's frame.
    pub(crate) fn take_reads(&self) -> ReadSet {
        TRACKING_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "tracking scope mismatch");
            stack.last_mut().map(std::mem::take).unwrap_or_default()
        })
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        TRACKING_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert!(popped.is_some(), "tracking stack underflow");
        });
    }
}
