//! Observable Implementation
//!
//! An Observable is the fundamental reactive primitive. It holds a value,
//! notifies listeners when the value changes and registers itself with any
//! computed value that reads it.
//!
//! # How Observables Work
//!
//! 1. When an observable is read within a reactive context, it records
//!    itself as a dependency of the evaluating computed value.
//!
//! 2. When its value changes, every dependent computed value is invalidated
//!    first, then listeners are called with `(new, old)`.
//!
//! 3. Writes equal to the current value (per the configured equality) are
//!    dropped without any notification.
//!
//! # Re-entrancy
//!
//! A listener may write to the observable it is listening to. Such writes
//! are queued and applied after the current notification round, one at a
//! time, each re-checked against the value current at that point. Queued
//! values that have become redundant are dropped, so listeners resync to
//! the latest value rather than replaying every intermediate one.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::context::ReactiveContext;
use super::runtime::{self, Dependent, DependentSet, Source};
use super::subscriber::{ListenerSet, Subscription};
use super::SubscriberId;
use crate::error::Result;

/// Equality used to suppress redundant writes and notifications.
pub type EqualsFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Listener invoked with `(new, old)` after a change.
pub type ChangeListener<T> = dyn Fn(&T, &T) + Send + Sync;

/// A reactive cell holding a value of type T.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::Observable;
///
/// let count = Observable::new(0);
/// let sub = count.subscribe(|new, old| println!("{old} -> {new}"));
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// sub.unsubscribe();
/// ```
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ObservableInner<T>>,
}

struct ObservableInner<T> {
    id: SubscriberId,
    label: RwLock<Option<String>>,
    value: RwLock<T>,
    equals: EqualsFn<T>,
    version: AtomicU64,
    listeners: ListenerSet<ChangeListener<T>>,
    dependents: DependentSet,
    notifying: AtomicBool,
    pending: Mutex<VecDeque<T>>,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new observable that compares values with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equals(value, |a: &T, b: &T| a == b)
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with a custom equality.
    pub fn with_equals<E>(value: T, equals: E) -> Self
    where
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ObservableInner {
                id: SubscriberId::new(),
                label: RwLock::new(None),
                value: RwLock::new(value),
                equals: Arc::new(equals),
                version: AtomicU64::new(0),
                listeners: ListenerSet::new(),
                dependents: DependentSet::default(),
                notifying: AtomicBool::new(false),
                pending: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Attach a name used in diagnostics and cycle reports.
    pub fn labeled(self, label: impl Into<String>) -> Self {
        *self.inner.label.write() = Some(label.into());
        self
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    pub fn label(&self) -> String {
        self.inner.display_label()
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// observable as a dependency of the evaluating computed value.
    pub fn get(&self) -> T {
        if ReactiveContext::is_active() {
            let source: Arc<dyn Source> = self.inner.clone();
            ReactiveContext::track_observable(source);
        }
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify listeners if it differs from the current one.
    ///
    /// Called from inside one of this observable's own listeners, the value is
    /// queued and applied once the running notification round is over.
    pub fn set(&self, value: T) {
        let inner = &self.inner;
        if inner.notifying.load(Ordering::Acquire) {
            tracing::trace!(observable = %inner.display_label(), "write queued during notification");
            inner.pending.lock().push_back(value);
            return;
        }

        inner.apply(value);
        loop {
            let next = inner.pending.lock().pop_front();
            match next {
                Some(value) => {
                    inner.apply(value);
                }
                None => break,
            }
        }
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.inner.value.read();
            f(&*guard)
        };
        self.set(new_value);
    }

    /// Register a listener called with `(new, old)` after every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.inner.listeners.insert(Arc::new(listener))
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Number of computed values that read this observable in their last run.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.len()
    }
}

impl<T> ObservableInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn display_label(&self) -> String {
        self.label
            .read()
            .clone()
            .unwrap_or_else(|| format!("Observable{}", self.id))
    }

    /// Swap in `value` unless it equals the current one. Returns whether a
    /// change was applied.
    fn apply(&self, value: T) -> bool {
        let old = {
            let mut guard = self.value.write();
            if (self.equals)(&*guard, &value) {
                return false;
            }
            std::mem::replace(&mut *guard, value.clone())
        };
        self.version.fetch_add(1, Ordering::AcqRel);

        // Eager refreshes count as part of the notification: listeners of
        // observed computed values that write back here are queued too.
        let _notifying = NotifyingGuard::enter(&self.notifying);
        runtime::propagate_change(&self.dependents, || {
            self.listeners.for_each(|listener| listener(&value, &old));
        });
        true
    }
}

impl<T> Source for ObservableInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn add_dependent(&self, id: SubscriberId, dependent: Weak<dyn Dependent>) {
        self.dependents.insert(id, dependent);
    }

    fn remove_dependent(&self, id: SubscriberId) {
        self.dependents.remove(id);
    }

    fn update(&self) -> Result<()> {
        Ok(())
    }
}

/// Holds the "notifying" flag for one notification round.
struct NotifyingGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> NotifyingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(true, Ordering::AcqRel);
        Self { flag, previous }
    }
}

impl Drop for NotifyingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

impl<T> Clone for Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Observable<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("listener_count", &self.listener_count())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
