//! Deferred recompute queue.
//!
//! A burst of synchronous writes can hit the same derived atom several times
//! in one turn. The first change recomputes and notifies immediately; the
//! rest are coalesced into a single catch-up pass that this queue holds
//! until the next [`flush`] checkpoint. The checkpoint marks the end of a
//! "tick": bindings that push writes are expected to call `flush()` once per
//! event-handling turn, the same way an event loop drains its microtask
//! queue.
//!
//! The queue is thread-local. No cross-thread scheduling exists; atoms are
//! single-threaded cooperative state and the deferral here is purely for
//! coalescing, not for I/O.

use std::cell::RefCell;
use std::collections::VecDeque;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static TASK_QUEUE: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
}

/// Queue a task for the next [`flush`] checkpoint.
pub(crate) fn enqueue(task: impl FnOnce() + 'static) {
    TASK_QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
}

/// Whether any deferred work is waiting for the next [`flush`].
pub fn has_pending() -> bool {
    TASK_QUEUE.with(|queue| !queue.borrow().is_empty())
}

/// Run every deferred task queued on this thread, in FIFO order.
///
/// Coalesced recomputes scheduled by earlier writes run here, at most once
/// per atom per tick. Tasks queued while flushing (e.g. by a recompute that
/// writes to another atom) are drained in the same call, so the queue is
/// empty when this returns.
pub fn flush() {
    let mut ran = 0usize;
    // Pop one task at a time so the queue borrow is released while the task
    // runs; tasks are allowed to enqueue more tasks.
    while let Some(task) = TASK_QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        task();
        ran += 1;
    }
    if ran > 0 {
        tracing::trace!(tasks = ran, "flushed deferred recomputes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn flush_runs_tasks_in_fifo_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            enqueue(move || order.lock().push(i));
        }

        assert!(has_pending());
        flush();
        assert!(!has_pending());

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn tasks_enqueued_while_flushing_run_in_the_same_flush() {
        let calls = Arc::new(AtomicI32::new(0));

        let inner = calls.clone();
        enqueue(move || {
            inner.fetch_add(1, Ordering::SeqCst);
            let innermost = inner.clone();
            enqueue(move || {
                innermost.fetch_add(1, Ordering::SeqCst);
            });
        });

        flush();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!has_pending());
    }

    #[test]
    fn flush_on_empty_queue_is_a_no_op() {
        flush();
        assert!(!has_pending());
    }
}
