//! Ripple Core
//!
//! This crate provides the state-management core of Ripple. It implements:
//!
//! - Observables: mutable cells with change notification
//! - Computed values: lazily evaluated, memoized derivations with automatic
//!   dependency discovery, glitch-free diamond resolution and cycle detection
//! - A transactional store with bounded undo/redo history
//!
//! Everything runs synchronously on the calling thread. Dependency tracking
//! state is thread-local, so independent threads never see each other's
//! evaluations.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Observables, computed values and dependency tracking
//! - `store`: The transactional state container and its history
//! - `error`: Errors raised while evaluating derived values
//!
//! # Example
//!
//! ```rust
//! use ripple_core::reactive::{Computed, Observable};
//!
//! // Create an observable
//! let count = Observable::new(1);
//!
//! // Create a derived value
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Listen for changes
//! let sub = doubled
//!     .subscribe(|new, old| println!("doubled: {old} -> {new}"))
//!     .unwrap();
//!
//! // Update the observable
//! count.set(5);
//! // Listener runs, prints: "doubled: 2 -> 10"
//! assert_eq!(doubled.get().unwrap(), 10);
//! sub.unsubscribe();
//! ```

pub mod error;
pub mod reactive;
pub mod store;

pub use error::{ReactiveError, Result};
