//! Covalent Core
//!
//! This crate provides the reactive atom runtime underneath the Covalent UI
//! component library. It implements:
//!
//! - Atoms: primitive cells and derived computations over them
//! - Automatic dependency tracking with dynamic dependency sets
//! - Subscription lifecycle with leak-free activation/deactivation
//! - Coalesced recompute scheduling for synchronous write bursts
//!
//! The UI components and the hooks binding atoms to re-renders live in
//! other crates; they consume only the public contract here.
//!
//! # Example
//!
//! ```
//! use covalent_core::{atom, derived, flush};
//!
//! let price = atom(10);
//! let quantity = atom(3);
//!
//! let total = {
//!     let (price, quantity) = (price.clone(), quantity.clone());
//!     derived(move || price.get() * quantity.get())
//! };
//! assert_eq!(total.get(), 30);
//!
//! let subscription = total.subscribe(|v| println!("total: {v}"), true);
//!
//! price.set(12).unwrap(); // notifies immediately
//! quantity.set(4).unwrap();
//! flush(); // tick checkpoint: coalesced catch-up runs here
//! assert_eq!(total.get(), 48);
//!
//! subscription.unsubscribe();
//! ```

pub mod reactive;

pub use reactive::{flush, has_pending, Atom, AtomError, AtomId, AtomKind, SubscriberFn, Subscription};

/// Create a primitive atom holding `value`.
///
/// Shorthand for [`Atom::new`].
pub fn atom<T>(value: T) -> Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Atom::new(value)
}

/// Create a derived atom computed by `compute`.
///
/// Shorthand for [`Atom::derived`]. Atoms read inside the closure become
/// the atom's dependencies; the set is rebuilt on every recomputation.
pub fn derived<T, F>(compute: F) -> Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Atom::derived(compute)
}
