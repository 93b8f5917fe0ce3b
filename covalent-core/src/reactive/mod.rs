//! Reactive Primitives
//!
//! This module implements the atom engine: primitive atoms, derived atoms,
//! automatic dependency tracking, and coalesced recompute scheduling.
//!
//! # Concepts
//!
//! ## Primitive atoms
//!
//! A primitive atom is a container for mutable state. Writing it notifies
//! every observer synchronously, in insertion order — every write, with no
//! equality check, because a write is an intent to notify.
//!
//! ## Derived atoms
//!
//! A derived atom caches a value computed from other atoms. Its dependency
//! set is whatever the computation actually read on its latest pass, so
//! conditional reads reshape the graph at runtime. Derived atoms are
//! read-only; writes fail with [`AtomError::DerivedWrite`].
//!
//! ## Activation
//!
//! A derived atom holds live subscriptions to its dependencies only while
//! something observes it. Unobserved, it holds nothing — no leaks from
//! computations nobody watches — and recomputes on demand when read.
//!
//! # Implementation Notes
//!
//! Dependency detection uses a thread-local tracking context: reading an
//! atom inside a derived computation registers it automatically. This
//! approach (sometimes called "automatic dependency tracking") is used by
//! SolidJS, Vue 3, and Leptos.
//!
//! Burst coalescing runs on a thread-local deferred-task queue drained by
//! [`flush`]; see `scheduler` for the tick model.

mod atom;
mod context;
mod derived;
mod error;
mod scheduler;
mod subscriber;

pub use atom::{Atom, AtomKind};
pub use error::AtomError;
pub use scheduler::{flush, has_pending};
pub use subscriber::{AtomId, SubscriberFn, Subscription};
