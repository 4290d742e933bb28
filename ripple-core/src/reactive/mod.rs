//! Reactive Primitives
//!
//! This module implements the reactive half of the core: observables and
//! computed values.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An Observable is a container for mutable state. When it is read while a
//! computed value evaluates, it registers itself as a dependency of that
//! computed value. When its value changes, dependents are invalidated and
//! listeners are called with the new and old values.
//!
//! ## Computed values
//!
//! A Computed is a derived value that caches its result. It is evaluated
//! lazily, re-evaluates only when one of its dependencies changed, and
//! resolves diamond-shaped graphs without ever mixing old and new inputs.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a value is read, we check if there is an active
//! tracking context and, if so, register the dependency. The set of values
//! currently being evaluated is thread-local as well, so cycle detection
//! never sees evaluations running on other threads.

mod computed;
mod context;
mod observable;
mod runtime;
mod subscriber;

pub use computed::Computed;
pub use context::{untrack, ReactiveContext, TrackedDependencies};
pub use observable::{ChangeListener, EqualsFn, Observable};
pub use runtime::MemoState;
pub use subscriber::{ListenerSet, SubscriberId, Subscription};
